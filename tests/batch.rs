mod common;

use std::fs;
use std::path::PathBuf;

use common::{pattern, video_bytes, write, FakeTool};
use motionmux::batch::{self, BatchOptions};
use motionmux::extract::{contains_video, find_embedded_video};
use motionmux::media::ImageType;
use motionmux::trailer::SamsungTrailer;

fn options(input: PathBuf, output: PathBuf) -> BatchOptions {
    BatchOptions {
        input_directory: input,
        output_directory: Some(output),
        recursive: true,
        copy_unmuxed: true,
        jobs: Some(2),
        ..Default::default()
    }
}

#[test]
fn muxes_pairs_and_copies_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    let video_a = video_bytes(400);
    let video_c = video_bytes(700);
    write(&input.join("a.jpg"), &pattern(100, 1));
    write(&input.join("a.mp4"), &video_a);
    write(&input.join("b.jpg"), &pattern(100, 2));
    write(&input.join("notes.txt"), b"notes");
    write(&input.join("sub/c.heic"), &pattern(300, 3));
    write(&input.join("sub/c.MOV"), &video_c);

    let tool = FakeTool::live_photo();
    let summary = batch::run(&options(input.clone(), output.clone()), || tool.clone()).unwrap();

    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(summary.muxed, 2);
    assert_eq!(summary.copied, 2);
    assert_eq!(summary.skipped, 0);

    let a = fs::read(output.join("a.jpg")).unwrap();
    assert_eq!(find_embedded_video(&a), Some(video_a.as_slice()));
    let c = fs::read(output.join("sub/c.heic")).unwrap();
    assert_eq!(find_embedded_video(&c), Some(video_c.as_slice()));
    assert_eq!(fs::read(output.join("b.jpg")).unwrap(), pattern(100, 2));
    assert_eq!(fs::read(output.join("notes.txt")).unwrap(), b"notes");
    assert!(!output.join("a.mp4").exists());
}

#[test]
fn incremental_run_skips_finished_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write(&input.join("a.jpg"), &pattern(100, 1));
    write(&input.join("a.mov"), &video_bytes(400));
    write(&input.join("b.heic"), &pattern(100, 2));
    write(&input.join("b.mov"), &video_bytes(500));
    write(&input.join("readme.md"), b"hello");

    let tool = FakeTool::live_photo();
    let options = BatchOptions {
        incremental: true,
        ..options(input, output)
    };

    let first = batch::run(&options, || tool.clone()).unwrap();
    assert_eq!((first.muxed, first.skipped, first.copied), (2, 0, 1));

    let second = batch::run(&options, || tool.clone()).unwrap();
    assert_eq!((second.muxed, second.skipped, second.copied), (0, 2, 0));
    assert!(second.is_success());
}

#[test]
fn existing_motion_photos_are_copied_not_muxed() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    let image = pattern(100, 5);
    let embedded = video_bytes(200);
    let trailer = SamsungTrailer::new(embedded, ImageType::Jpg)
        .finalize(image.len() as u64)
        .unwrap();
    let mut motion_photo = image;
    motion_photo.extend_from_slice(&trailer.emit());
    write(&input.join("m.jpg"), &motion_photo);
    write(&input.join("m.mp4"), &video_bytes(300));

    let tool = FakeTool::live_photo();
    let summary = batch::run(&options(input, output.clone()), || tool.clone()).unwrap();

    assert_eq!((summary.muxed, summary.skipped, summary.copied), (0, 1, 2));
    assert_eq!(fs::read(output.join("m.jpg")).unwrap(), motion_photo);
    assert!(output.join("m.mp4").is_file());
}

#[test]
fn pairs_by_content_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    let video = video_bytes(300);
    write(&input.join("IMG_0001.HEIC"), &pattern(100, 1));
    write(&input.join("clip.mov"), &video);
    write(&input.join("other.mov"), &video_bytes(250));

    let mut tool = FakeTool::live_photo();
    tool.content_ids
        .insert(input.join("IMG_0001.HEIC"), "5F2C-ID".to_string());
    tool.content_ids
        .insert(input.join("clip.mov"), "5F2C-ID".to_string());
    let options = BatchOptions {
        exif_match: true,
        ..options(input, output.clone())
    };
    let summary = batch::run(&options, || tool.clone()).unwrap();

    assert_eq!(summary.muxed, 1);
    assert_eq!(summary.copied, 1);
    let muxed = fs::read(output.join("IMG_0001.HEIC")).unwrap();
    assert!(contains_video(&muxed, &video));
    assert!(output.join("other.mov").is_file());
}

#[test]
fn one_failure_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    for stem in ["a", "bad", "c"] {
        write(&input.join(format!("{}.jpg", stem)), &pattern(50, 1));
        write(&input.join(format!("{}.mp4", stem)), &video_bytes(100));
    }

    let tool = FakeTool {
        fail_injection_for: Some("bad".to_string()),
        ..FakeTool::live_photo()
    };
    let options = BatchOptions {
        copy_unmuxed: false,
        jobs: Some(3),
        ..options(input.clone(), output.clone())
    };
    let summary = batch::run(&options, || tool.clone()).unwrap();

    assert_eq!(summary.muxed, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, input.join("bad.jpg"));
    assert!(output.join("a.jpg").is_file());
    assert!(output.join("c.jpg").is_file());
    assert!(!output.join("bad.jpg").exists());
}

#[test]
fn copy_unmuxed_into_input_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let options = options(dir.path().to_path_buf(), dir.path().to_path_buf());
    assert!(batch::run(&options, FakeTool::default).is_err());
}

#[test]
fn unreadable_file_does_not_stop_content_pairing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    let video = video_bytes(300);
    write(&input.join("a.jpg"), &pattern(100, 1));
    write(&input.join("a_video.mov"), &video);
    write(&input.join("corrupt.jpg"), b"");

    let mut tool = FakeTool {
        unreadable: Some("corrupt.jpg".to_string()),
        ..FakeTool::live_photo()
    };
    tool.content_ids
        .insert(input.join("a.jpg"), "ID-1".to_string());
    tool.content_ids
        .insert(input.join("a_video.mov"), "ID-1".to_string());
    let options = BatchOptions {
        exif_match: true,
        ..options(input, output.clone())
    };
    let summary = batch::run(&options, || tool.clone()).unwrap();

    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!((summary.muxed, summary.copied), (1, 1));
    let muxed = fs::read(output.join("a.jpg")).unwrap();
    assert!(contains_video(&muxed, &video));
    assert!(output.join("corrupt.jpg").is_file());
}

#[test]
fn unusable_output_subdirectory_fails_only_its_pair() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write(&input.join("a.jpg"), &pattern(100, 1));
    write(&input.join("a.mov"), &video_bytes(300));
    write(&input.join("sub/b.jpg"), &pattern(100, 2));
    write(&input.join("sub/b.mov"), &video_bytes(300));
    // a file where the mirrored directory should go
    write(&output.join("sub"), b"in the way");

    let options = BatchOptions {
        copy_unmuxed: false,
        ..options(input.clone(), output.clone())
    };
    let tool = FakeTool::live_photo();
    let summary = batch::run(&options, || tool.clone()).unwrap();

    assert_eq!(summary.muxed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, input.join("sub/b.jpg"));
    assert!(output.join("a.jpg").is_file());
}
