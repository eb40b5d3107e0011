use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use cholecseg::coco::{Annotation, Category, CocoFile, Image};
use cholecseg::config::ConvertArgs;
use cholecseg::convert::convert_dataset;
use cholecseg::eval::{evaluate_detections, Detection, GroundTruth};
use cholecseg::split::split_dataset;
use cholecseg::types::FrameRef;

fn write_json(path: &Path, value: &serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut file = File::create(path).unwrap();
    file.write_all(value.to_string().as_bytes()).unwrap();
}

fn write_png(path: &Path, width: u32, height: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    image::RgbImage::new(width, height).save(path).unwrap();
}

fn labelme_doc(shapes: serde_json::Value, dims: Option<(u32, u32)>) -> serde_json::Value {
    let mut doc = serde_json::json!({
        "version": "5.0.1",
        "flags": {},
        "shapes": shapes,
        "imagePath": "ignored.png",
    });
    if let Some((width, height)) = dims {
        doc["imageWidth"] = width.into();
        doc["imageHeight"] = height.into();
    }
    doc
}

fn polygon(label: &str, points: &[[f64; 2]]) -> serde_json::Value {
    serde_json::json!({
        "label": label,
        "points": points,
        "group_id": null,
        "shape_type": "polygon",
        "flags": {}
    })
}

#[test]
fn frame_ref_parsing() {
    assert_eq!(
        FrameRef::parse("t50_VID01_000468"),
        Some(FrameRef {
            video_id: "VID01".to_string(),
            frame_id: "000468".to_string(),
        })
    );
    assert_eq!(
        FrameRef::parse("t50_VID12_sub_000001").map(|f| f.frame_id),
        Some("000001".to_string())
    );
    assert_eq!(FrameRef::parse("noseparators"), None);
    assert_eq!(FrameRef::parse("only_two"), None);
}

#[test]
fn convert_known_fixture_yields_exact_document() {
    let temp = tempfile::tempdir().unwrap();
    let ann_dir = temp.path().join("ann");
    let image_dir = temp.path().join("img");
    let output = temp.path().join("annotations/train_coco.json");

    // Frame 1: dimensions carried by the annotation file.
    write_json(
        &ann_dir.join("VID01_full/ann_dir/t50_VID01_000001.json"),
        &labelme_doc(
            serde_json::json!([
                polygon("grasper", &[[10.0, 20.0], [30.0, 25.0], [15.0, 40.0]]),
                polygon(
                    "hook",
                    &[[100.0, 100.0], [150.0, 100.0], [150.0, 130.0], [100.0, 130.0]]
                ),
            ]),
            Some((640, 480)),
        ),
    );
    write_png(&image_dir.join("videos/VID01/000001.png"), 640, 480);

    // Frame 2: dimensions probed from the image header.
    write_json(
        &ann_dir.join("VID01_full/ann_dir/t50_VID01_000002.json"),
        &labelme_doc(
            serde_json::json!([polygon(
                "grasper",
                &[[5.0, 5.0], [25.0, 5.0], [25.0, 15.0], [5.0, 15.0]]
            )]),
            None,
        ),
    );
    write_png(&image_dir.join("videos/VID01/000002.png"), 320, 240);

    let args = ConvertArgs {
        ann_dir,
        image_dir,
        output: output.clone(),
    };
    let (coco, stats) = convert_dataset(&args).unwrap();

    let expected = CocoFile {
        images: vec![
            Image {
                id: 1,
                file_name: "videos/VID01/000001.png".to_string(),
                height: 480,
                width: 640,
            },
            Image {
                id: 2,
                file_name: "videos/VID01/000002.png".to_string(),
                height: 240,
                width: 320,
            },
        ],
        annotations: vec![
            Annotation {
                id: 1,
                image_id: 1,
                category_id: 1,
                segmentation: vec![vec![10.0, 20.0, 30.0, 25.0, 15.0, 40.0]],
                bbox: [10.0, 20.0, 20.0, 20.0],
                area: 400.0,
                iscrowd: 0,
            },
            Annotation {
                id: 2,
                image_id: 1,
                category_id: 2,
                segmentation: vec![vec![
                    100.0, 100.0, 150.0, 100.0, 150.0, 130.0, 100.0, 130.0,
                ]],
                bbox: [100.0, 100.0, 50.0, 30.0],
                area: 1500.0,
                iscrowd: 0,
            },
            Annotation {
                id: 3,
                image_id: 2,
                category_id: 1,
                segmentation: vec![vec![5.0, 5.0, 25.0, 5.0, 25.0, 15.0, 5.0, 15.0]],
                bbox: [5.0, 5.0, 20.0, 10.0],
                area: 200.0,
                iscrowd: 0,
            },
        ],
        categories: vec![
            Category {
                id: 1,
                name: "grasper".to_string(),
            },
            Category {
                id: 2,
                name: "hook".to_string(),
            },
        ],
    };

    assert_eq!(coco, expected);
    assert_eq!(stats.files_scanned, 2);
    assert_eq!(stats.images_converted, 2);
    assert_eq!(stats.annotations_converted, 3);

    // The written file round-trips to the same document and is valid.
    let reloaded = CocoFile::load(&output).unwrap();
    assert_eq!(reloaded, expected);
    assert!(reloaded.validate().is_ok());
}

#[test]
fn convert_skips_malformed_and_missing_inputs() {
    let temp = tempfile::tempdir().unwrap();
    let ann_dir = temp.path().join("ann");
    let image_dir = temp.path().join("img");

    write_json(
        &ann_dir.join("VID01_full/ann_dir/t50_VID01_000001.json"),
        &labelme_doc(
            serde_json::json!([polygon("grasper", &[[1.0, 1.0], [3.0, 1.0], [2.0, 4.0]])]),
            Some((64, 48)),
        ),
    );
    write_png(&image_dir.join("videos/VID01/000001.png"), 64, 48);

    // Malformed JSON is skipped, not fatal.
    let bad_path = ann_dir.join("VID01_full/ann_dir/t50_VID01_000002.json");
    fs::create_dir_all(bad_path.parent().unwrap()).unwrap();
    fs::write(&bad_path, b"{not valid json").unwrap();

    // Annotation without an image on disk is skipped.
    write_json(
        &ann_dir.join("VID03_full/ann_dir/t50_VID03_000099.json"),
        &labelme_doc(
            serde_json::json!([polygon("hook", &[[1.0, 1.0], [2.0, 1.0], [2.0, 2.0]])]),
            Some((64, 48)),
        ),
    );

    let args = ConvertArgs {
        ann_dir,
        image_dir,
        output: temp.path().join("out/coco.json"),
    };
    let (coco, stats) = convert_dataset(&args).unwrap();

    assert_eq!(coco.images.len(), 1);
    assert_eq!(coco.annotations.len(), 1);
    assert_eq!(stats.files_scanned, 3);
    assert_eq!(stats.failed_parse, 1);
    assert_eq!(stats.skipped_missing_image, 1);
}

#[test]
fn convert_keeps_images_with_empty_shape_lists() {
    let temp = tempfile::tempdir().unwrap();
    let ann_dir = temp.path().join("ann");
    let image_dir = temp.path().join("img");

    // Annotated frame with zero shapes still yields its image entry.
    write_json(
        &ann_dir.join("VID02_full/ann_dir/t50_VID02_000010.json"),
        &labelme_doc(serde_json::json!([]), Some((64, 48))),
    );
    write_png(&image_dir.join("videos/VID02/000010.png"), 64, 48);

    // A shape without points is dropped, its image is kept.
    write_json(
        &ann_dir.join("VID02_full/ann_dir/t50_VID02_000011.json"),
        &labelme_doc(
            serde_json::json!([polygon("grasper", &[])]),
            Some((64, 48)),
        ),
    );
    write_png(&image_dir.join("videos/VID02/000011.png"), 64, 48);

    let args = ConvertArgs {
        ann_dir,
        image_dir,
        output: temp.path().join("out/coco.json"),
    };
    let (coco, stats) = convert_dataset(&args).unwrap();

    assert_eq!(coco.images.len(), 2);
    assert!(coco.annotations.is_empty());
    assert!(coco.categories.is_empty());
    assert_eq!(stats.skipped_empty_shapes, 1);
}

fn synthetic_coco(n_images: usize) -> CocoFile {
    let images = (1..=n_images as u32)
        .map(|id| Image {
            id,
            file_name: format!("videos/VID01/{:06}.png", id),
            height: 480,
            width: 640,
        })
        .collect();
    let annotations = (1..=n_images as u32)
        .map(|id| Annotation {
            id,
            image_id: id,
            category_id: 1,
            segmentation: vec![vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0]],
            bbox: [0.0, 0.0, 10.0, 10.0],
            area: 100.0,
            iscrowd: 0,
        })
        .collect();
    CocoFile {
        images,
        annotations,
        categories: vec![Category {
            id: 1,
            name: "grasper".to_string(),
        }],
    }
}

#[test]
fn split_partitions_at_the_configured_ratio() {
    let coco = synthetic_coco(1000);
    let (train, test) = split_dataset(&coco, 0.1, 42);

    assert_eq!(train.images.len(), 900);
    assert_eq!(test.images.len(), 100);

    let train_ids: std::collections::HashSet<u32> =
        train.images.iter().map(|img| img.id).collect();
    let test_ids: std::collections::HashSet<u32> = test.images.iter().map(|img| img.id).collect();
    assert!(train_ids.is_disjoint(&test_ids));
    assert_eq!(train_ids.len() + test_ids.len(), 1000);

    // Every annotation follows its image.
    assert!(train
        .annotations
        .iter()
        .all(|ann| train_ids.contains(&ann.image_id)));
    assert!(test
        .annotations
        .iter()
        .all(|ann| test_ids.contains(&ann.image_id)));
    assert_eq!(train.annotations.len() + test.annotations.len(), 1000);

    assert_eq!(train.categories, coco.categories);
    assert_eq!(test.categories, coco.categories);
    assert!(train.validate().is_ok());
    assert!(test.validate().is_ok());
}

#[test]
fn split_is_deterministic_for_a_fixed_seed() {
    let coco = synthetic_coco(50);
    let (train_a, test_a) = split_dataset(&coco, 0.1, 42);
    let (train_b, test_b) = split_dataset(&coco, 0.1, 42);
    assert_eq!(train_a, train_b);
    assert_eq!(test_a, test_b);
}

#[test]
fn split_handles_small_datasets() {
    let coco = synthetic_coco(10);
    let (train, test) = split_dataset(&coco, 0.1, 7);
    assert_eq!(train.images.len(), 9);
    assert_eq!(test.images.len(), 1);

    // Below the ratio's granularity everything stays in train.
    let coco = synthetic_coco(9);
    let (train, test) = split_dataset(&coco, 0.1, 7);
    assert_eq!(train.images.len(), 9);
    assert!(test.images.is_empty());
}

#[test]
fn perfect_detections_score_unit_metrics() {
    let categories = vec![Category {
        id: 1,
        name: "grasper".to_string(),
    }];
    let ground_truths = vec![
        GroundTruth {
            image_id: 1,
            category_id: 1,
            bbox: [0.0, 0.0, 10.0, 10.0],
        },
        GroundTruth {
            image_id: 2,
            category_id: 1,
            bbox: [5.0, 5.0, 20.0, 25.0],
        },
    ];
    let detections: Vec<Detection> = ground_truths
        .iter()
        .map(|gt| Detection {
            image_id: gt.image_id,
            category_id: gt.category_id,
            bbox: gt.bbox,
            score: 0.9,
        })
        .collect();

    let summary = evaluate_detections(&detections, &ground_truths, &categories);
    assert!((summary.ap - 1.0).abs() < 1e-12);
    assert!((summary.ap50 - 1.0).abs() < 1e-12);
    assert!((summary.ap75 - 1.0).abs() < 1e-12);
    assert!((summary.ar1 - 1.0).abs() < 1e-12);
    assert!((summary.ar100 - 1.0).abs() < 1e-12);
    assert_eq!(summary.per_category.len(), 1);
}

#[test]
fn loose_detection_passes_low_thresholds_only() {
    let categories = vec![Category {
        id: 1,
        name: "grasper".to_string(),
    }];
    let ground_truths = vec![GroundTruth {
        image_id: 1,
        category_id: 1,
        bbox: [0.0, 0.0, 10.0, 10.0],
    }];
    // IoU with the ground truth is exactly 0.6: a match at thresholds
    // 0.50/0.55/0.60, a false positive above.
    let detections = vec![Detection {
        image_id: 1,
        category_id: 1,
        bbox: [0.0, 0.0, 10.0, 6.0],
        score: 0.9,
    }];

    let summary = evaluate_detections(&detections, &ground_truths, &categories);
    assert!((summary.ap50 - 1.0).abs() < 1e-12);
    assert!(summary.ap75.abs() < 1e-12);
    assert!((summary.ap - 0.3).abs() < 1e-12);
    assert!((summary.ar100 - 0.3).abs() < 1e-12);
}

#[test]
fn detections_for_unannotated_categories_are_ignored() {
    let categories = vec![
        Category {
            id: 1,
            name: "grasper".to_string(),
        },
        Category {
            id: 2,
            name: "hook".to_string(),
        },
    ];
    let ground_truths = vec![GroundTruth {
        image_id: 1,
        category_id: 1,
        bbox: [0.0, 0.0, 10.0, 10.0],
    }];
    let detections = vec![
        Detection {
            image_id: 1,
            category_id: 1,
            bbox: [0.0, 0.0, 10.0, 10.0],
            score: 0.9,
        },
        // No hook ground truth anywhere: this must not drag the mean down.
        Detection {
            image_id: 1,
            category_id: 2,
            bbox: [50.0, 50.0, 60.0, 60.0],
            score: 0.8,
        },
    ];

    let summary = evaluate_detections(&detections, &ground_truths, &categories);
    assert!((summary.ap - 1.0).abs() < 1e-12);
    assert_eq!(summary.per_category.len(), 1);
    assert_eq!(summary.per_category[0].category, "grasper");
}
