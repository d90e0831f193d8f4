mod common;

use common::{count, write_capture, SAMPLES_PER_PACKET, START_SEC};
use libquartz::config::{ConvertConfig, OutputFormat};
use libquartz::error::{ConverterError, PacketError, ProcessorError};
use libquartz::inspect::{check_capture, repair_capture};
use libquartz::process::process;
use libquartz::sink::read_flat_file;
use std::sync::{Arc, Mutex};

#[test]
fn test_convert_two_files_to_flat() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("run-0.dat");
    let second = dir.path().join("run-1.dat");
    write_capture(&first, 0, &[1, 2, 3, 4]);
    // one packet lost between the files' sequence counters
    write_capture(&second, 4, &[6, 7, 8, 9]);
    let scale = dir.path().join("scale.txt");
    std::fs::write(&scale, "# chan, offset, slope, unit, label\n1, 1.0, 2.0, Pascal, CM1\n")
        .unwrap();

    let config = ConvertConfig {
        capture_paths: vec![first, second],
        output_path: dir.path().join("run.f32"),
        output_format: OutputFormat::Flat,
        calibration_path: None,
        scale_path: Some(scale),
        block_size: 3 * common::layout().packet_len(),
        title: String::from("bench test"),
        ..Default::default()
    };
    let output = config.output_path.clone();
    let status = Arc::new(Mutex::new(0.0));
    let summary = process(config, status.clone()).unwrap();

    let rows = 8 * SAMPLES_PER_PACKET;
    assert_eq!(summary.packets, 8);
    assert_eq!(summary.rows, rows as u64);
    assert_eq!(summary.gaps, 1);
    assert_eq!(summary.missing_packets, 1);
    assert_eq!(*status.lock().unwrap(), 1.0);

    let (info, values) = read_flat_file(&output).unwrap();
    assert_eq!(info.rows, rows);
    assert_eq!(info.columns, 32);
    assert_eq!(info.title, "bench test");
    assert_eq!(info.fsamp, 250e3);
    assert!((info.t0.unwrap() - START_SEC as f64).abs() < 1e-6);
    assert_eq!(info.units[0], "Pascal");
    assert_eq!(info.labels[0], "CM1");
    assert_eq!(info.units[1], "adc");
    assert_eq!(info.labels[1], "ch2");
    assert_eq!(info.scale[1][0], 2.0);
    assert_eq!(info.calib[1][0], 1.0);

    assert_eq!(values.shape(), &[rows, 32]);
    for n in [0, 13, 57, rows - 1] {
        assert_eq!(values[[n, 0]], (2 * count(n, 0) + 1) as f32);
        assert_eq!(values[[n, 1]], count(n, 1) as f32);
        assert_eq!(values[[n, 31]], count(n, 31) as f32);
    }
}

#[test]
fn test_convert_rejects_partial_mask() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.dat");
    let layout = common::layout();
    let mut header = libquartz::packet::PacketHeader::new(&layout, 1, START_SEC, 0);
    header.channel_mask = 0x0000_FFFF;
    let steps = vec![[0i32; 32]; SAMPLES_PER_PACKET];
    std::fs::write(&path, libquartz::packet::encode_packet(&header, &steps)).unwrap();

    let config = ConvertConfig {
        capture_paths: vec![path],
        output_path: dir.path().join("out.f32"),
        ..Default::default()
    };
    let result = process(config, Arc::new(Mutex::new(0.0)));
    let err = match result {
        Err(ProcessorError::ConverterError(ConverterError::PacketError(e))) => e,
        other => panic!("unexpected result {other:?}"),
    };
    assert!(err.is_unsupported());
    assert!(matches!(
        err,
        PacketError::PartialChannelMask {
            index: 0,
            mask: 0x0000_FFFF
        }
    ));
}

#[test]
fn test_repaired_file_converts_without_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let gappy = dir.path().join("gappy.dat");
    let fixed = dir.path().join("fixed.dat");
    write_capture(&gappy, 0, &[10, 11, 14, 15]);

    let report = check_capture(&gappy).unwrap();
    assert_eq!(report.jumps.len(), 1);
    assert_eq!(report.jumps[0].gap.missing(), 2);
    repair_capture(&gappy, &fixed).unwrap();

    let config = ConvertConfig {
        capture_paths: vec![fixed],
        output_path: dir.path().join("fixed.f32"),
        ..Default::default()
    };
    let summary = process(config, Arc::new(Mutex::new(0.0))).unwrap();
    assert_eq!(summary.packets, 6);
    assert_eq!(summary.gaps, 0);
    assert_eq!(summary.rows, (6 * SAMPLES_PER_PACKET) as u64);
}
