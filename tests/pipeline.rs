use image::{DynamicImage, GrayImage, Luma};
use std::fs::{self, File};
use std::path::Path;
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use ortho_hotspots::PipelineConfig;
use ortho_hotspots::anomaly_store::AnomalyStore;
use ortho_hotspots::detection::{AdapterError, AnomalyMeta, Detection, PatchDetections, Point};
use ortho_hotspots::patch_store::PatchStore;
use ortho_hotspots::pipeline::{detect, postprocess, preprocess};

const WIDTH: u32 = 1000;
const HEIGHT: u32 = 600;

fn write_geotiff(path: &Path, width: u32, height: u32, origin: (f64, f64), epsg: u16, data: &[u8]) {
    let mut file = File::create(path).expect("create tif");
    let mut tiff = TiffEncoder::new(&mut file).expect("encoder");
    let mut image = tiff
        .new_image::<colortype::RGB8>(width, height)
        .expect("image");
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &[0.5f64, 0.5, 0.0][..])
        .expect("scale");
    image
        .encoder()
        .write_tag(
            Tag::ModelTiepointTag,
            &[0.0f64, 0.0, 0.0, origin.0, origin.1, 0.0][..],
        )
        .expect("tiepoint");
    image
        .encoder()
        .write_tag(
            Tag::GeoKeyDirectoryTag,
            &[1u16, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, epsg][..],
        )
        .expect("geokeys");
    image.write_data(data).expect("write data");
}

/// 1000x600 UTM 33N orthophoto at 0.5 m/px with one bright 11x11 square at (10, 522).
fn write_orthophoto(path: &Path) {
    let mut data = vec![60u8; (WIDTH * HEIGHT * 3) as usize];
    for y in 522..=532 {
        for x in 10..=20 {
            let i = ((y * WIDTH + x) * 3) as usize;
            data[i..i + 3].copy_from_slice(&[255, 255, 255]);
        }
    }
    write_geotiff(path, WIDTH, HEIGHT, (500_000.0, 5_000_000.0), 32633, &data);
}

/// Finds bright blobs; also reports a weak detection on every patch.
fn bright_spot_adapter(patch: &DynamicImage, _threshold: f64) -> Result<Vec<Detection>, AdapterError> {
    let gray = patch.to_luma8();
    let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > 200 {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let weak = Detection {
        bbox: [0.0, 0.0, 1.0, 1.0],
        class_id: 9,
        score: 0.5,
        contour: vec![vec![Point::new(0.0, 0.0)]],
        center: Point::new(0.0, 0.0),
    };
    let mut out = vec![weak];

    let fg: Vec<(u32, u32)> = mask
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| (x, y))
        .collect();
    if let (Some(x0), Some(x1), Some(y0), Some(y1)) = (
        fg.iter().map(|p| p.0).min(),
        fg.iter().map(|p| p.0).max(),
        fg.iter().map(|p| p.1).min(),
        fg.iter().map(|p| p.1).max(),
    ) {
        let bbox = [x0 as f64, y0 as f64, x1 as f64, y1 as f64];
        out.extend(Detection::from_mask(bbox, 1, 0.93, &mask));
    }
    Ok(out)
}

#[test]
fn full_pipeline_on_synthetic_orthophoto() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = dir.path();
    let orthophoto = folder.join("odm_orthophoto.tif");
    write_orthophoto(&orthophoto);
    let config = PipelineConfig::default();

    let meta = preprocess(folder, &config).expect("preprocess");
    let patches = meta.get("odm_orthophoto.tif").expect("mosaic entry");
    let offsets: Vec<(u32, u32)> = patches.iter().map(|p| (p.offset_x, p.offset_y)).collect();
    assert_eq!(offsets, vec![(0, 0), (640, 0), (0, 512), (640, 512)]);
    assert_eq!(patches[2].name, "odm_orthophoto.tif-patch3.png");

    let store = PatchStore::new(folder, &config);
    assert_eq!(store.patch_files().expect("list").len(), 4);
    let patch3 = image::open(store.patches_folder().join(&patches[2].name)).expect("patch3");
    assert_eq!((patch3.width(), patch3.height()), (640, 512));
    assert_eq!(store.read_mosaic_meta().expect("read"), Some(meta.clone()));

    let mut adapter = bright_spot_adapter;
    let found = detect(folder, &mut adapter, &config).expect("detect");
    assert_eq!(found, 1);
    let anomaly_meta = store.read_anomaly_meta().expect("read").expect("anomaly meta");
    assert_eq!(
        anomaly_meta.patch_names().collect::<Vec<_>>(),
        vec!["odm_orthophoto.tif-patch3.png"]
    );

    let merged = postprocess(&orthophoto, &config).expect("postprocess");
    assert_eq!(merged.len(), 1);
    assert_eq!(merged.boxes()[0], [10.0, 522.0, 20.0, 532.0]);
    assert_eq!(merged.centers()[0], Point::new(15.0, 527.0));
    assert!(
        merged.contours()[0][0]
            .iter()
            .all(|p| (10.0..=20.0).contains(&p.x) && (522.0..=532.0).contains(&p.y))
    );

    let latlong = merged.latlong().expect("latlong");
    assert_eq!(latlong.len(), 1);
    assert!(latlong[0].lat > 45.0 && latlong[0].lat < 45.3, "lat {}", latlong[0].lat);
    assert!(latlong[0].lon > 15.0 && latlong[0].lon < 15.001, "lon {}", latlong[0].lon);
    assert_eq!(latlong[0].alt, 0.0);

    assert_eq!(AnomalyStore::new(folder, &config).load().expect("load"), merged);
}

#[test]
fn failing_adapter_yields_no_latlong() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = dir.path();
    let orthophoto = folder.join("odm_orthophoto.tif");
    write_orthophoto(&orthophoto);
    let config = PipelineConfig::default();

    preprocess(folder, &config).expect("preprocess");
    let mut adapter = |_: &DynamicImage, _: f64| -> Result<Vec<Detection>, AdapterError> {
        Err(AdapterError::Model("out of memory".to_string()))
    };
    assert_eq!(detect(folder, &mut adapter, &config).expect("detect"), 0);

    let merged = postprocess(&orthophoto, &config).expect("postprocess");
    assert!(merged.is_empty());
    assert!(merged.latlong().is_none());

    let text = fs::read_to_string(folder.join("anomalies.json")).expect("read");
    let value: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert!(value.get("latlong").is_none());
    assert_eq!(value["boxes"], serde_json::json!([]));
}

#[test]
fn postprocess_without_metadata_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orthophoto = dir.path().join("odm_orthophoto.tif");
    write_orthophoto(&orthophoto);

    let merged = postprocess(&orthophoto, &PipelineConfig::default()).expect("postprocess");
    assert!(merged.is_empty());
    assert!(merged.is_aligned());
}

#[test]
fn rerunning_preprocess_regenerates_patches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = dir.path();
    write_orthophoto(&folder.join("odm_orthophoto.tif"));
    let mut config = PipelineConfig::default();

    preprocess(folder, &config).expect("first run");
    let stale = folder.join("patches").join("stale-patch99.png");
    fs::write(&stale, b"old").expect("stale");

    config.patch_width = 500;
    config.patch_height = 300;
    let meta = preprocess(folder, &config).expect("second run");

    assert!(!stale.exists());
    assert_eq!(meta.patch_count(), 4);
    let store = PatchStore::new(folder, &config);
    assert_eq!(store.patch_files().expect("list").len(), 4);
}

/// 100x100 Swiss LV95 orthophoto whose corner sits on the LV95 false origin.
fn lv95_job(with_detection: bool) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let orthophoto = dir.path().join("odm_orthophoto.tif");
    write_geotiff(
        &orthophoto,
        100,
        100,
        (2_600_000.0, 1_200_000.0),
        2056,
        &vec![60u8; 100 * 100 * 3],
    );

    let config = PipelineConfig::default();
    preprocess(dir.path(), &config).expect("preprocess");
    let mut meta = AnomalyMeta::new();
    if with_detection {
        let found: PatchDetections = std::iter::once(Detection {
            bbox: [0.0, 0.0, 4.0, 4.0],
            class_id: 1,
            score: 0.9,
            contour: vec![vec![Point::new(0.0, 0.0), Point::new(4.0, 4.0)]],
            center: Point::new(0.0, 0.0),
        })
        .collect();
        meta.insert("odm_orthophoto.tif-patch1.png", found);
    }
    PatchStore::new(dir.path(), &config)
        .write_anomaly_meta(&meta)
        .expect("anomaly meta");
    (dir, orthophoto)
}

#[test]
fn national_grid_orthophoto_is_geocoded() {
    let (dir, orthophoto) = lv95_job(true);
    let merged = postprocess(&orthophoto, &PipelineConfig::default()).expect("postprocess");

    let latlong = merged.latlong().expect("latlong");
    assert!((latlong[0].lat - 46.9511).abs() < 2e-3, "lat {}", latlong[0].lat);
    assert!((latlong[0].lon - 7.4386).abs() < 2e-3, "lon {}", latlong[0].lon);
    assert!(dir.path().join("anomalies.json").exists());
}

#[test]
fn national_grid_orthophoto_without_detections() {
    let (dir, orthophoto) = lv95_job(false);
    let merged = postprocess(&orthophoto, &PipelineConfig::default()).expect("postprocess");

    assert!(merged.is_empty());
    let text = fs::read_to_string(dir.path().join("anomalies.json")).expect("read");
    assert!(!text.contains("latlong"));
}

#[test]
fn anomaly_file_name_follows_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = dir.path();
    let orthophoto = folder.join("odm_orthophoto.tif");
    write_orthophoto(&orthophoto);
    let config = PipelineConfig {
        anomaly_meta: "hotspots.json".to_string(),
        ..PipelineConfig::default()
    };

    preprocess(folder, &config).expect("preprocess");
    let mut adapter = bright_spot_adapter;
    detect(folder, &mut adapter, &config).expect("detect");
    let merged = postprocess(&orthophoto, &config).expect("postprocess");

    assert!(folder.join("hotspots.json").exists());
    assert!(!folder.join("anomalies.json").exists());
    assert_eq!(AnomalyStore::new(folder, &config).load().expect("load"), merged);
}
