mod common;

use common::{count, write_capture, SAMPLES_PER_PACKET};
use libquartz::acquisition::write_cache_file;
use libquartz::dataset::{open, Backend, ChannelKey, DataSet};
use libquartz::error::{DataSetError, LookupError};
use libquartz::uff::UffWriter;
use serde_json::json;
use std::path::Path;

const MANIFEST: &str = r#"{
    "AcquisitionId": "bench-0001",
    "SampleRate": 250000.0,
    "Signals": [
        {"Address": {"Chassis": 1, "Channel": 1}, "Slope": 2.0, "Intercept": 0.5,
         "Egu": "Pascal", "Name": "513-BS01-CM1", "Desc": "Upstream", "OutDataFile": "cm1.j"},
        {"Address": {"Chassis": 1, "Channel": 2}, "Slope": 1.0, "Intercept": 0.0,
         "Egu": "Pascal", "Name": "513-BS01-CM2", "Desc": "Downstream", "OutDataFile": "gone.j"},
        {"Address": {"Chassis": 1, "Channel": 3}, "Slope": 0.5, "Intercept": -1.0,
         "Egu": "V", "Name": "513-BS01-SP3", "Desc": "Spare"}
    ],
    "Chassis": [
        {"Chassis": 1, "Dat": ["c1-0.dat", "c1-1.dat"]}
    ]
}"#;

fn write_session(dir: &Path) -> std::path::PathBuf {
    write_capture(&dir.join("c1-0.dat"), 0, &[1, 2, 3]);
    write_capture(&dir.join("c1-1.dat"), 3, &[4, 5, 6]);
    let mut cache = std::fs::File::create(dir.join("cm1.j")).unwrap();
    write_cache_file(&mut cache, &[10, -20, 30]).unwrap();
    let path = dir.join("acquisition.json");
    std::fs::write(&path, MANIFEST).unwrap();
    path
}

#[test]
fn test_session_reads_cache_and_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = open(&write_session(dir.path())).unwrap();
    assert_eq!(dataset.backend(), Backend::AcquisitionSession);
    assert_eq!(dataset.len(), 3);

    // cached channel
    let cm1 = dataset.channel("*CM1").unwrap();
    assert_eq!(cm1.values().to_vec(), vec![20.5, -39.5, 60.5]);
    assert_eq!(cm1.info().unit, "Pascal");
    assert!((cm1.time()[2] - 8e-6).abs() < 1e-12);

    // cache file missing, read from both capture files
    let cm2 = dataset.channel("*CM2").unwrap();
    let rows = 6 * SAMPLES_PER_PACKET;
    assert_eq!(cm2.len(), rows);
    assert_eq!(cm2.values()[50], count(50, 1) as f64);

    // no cache file at all
    let spare = dataset.channel(2usize).unwrap();
    assert_eq!(spare.len(), rows);
    assert_eq!(spare.values()[3], count(3, 2) as f64 * 0.5 - 1.0);

    // matched by the description line as well
    assert_eq!(dataset.lookup("Down*").unwrap(), 1);
    assert!(matches!(
        dataset.lookup("513-*"),
        Err(LookupError::Ambiguous { ref matches, .. }) if matches == &vec![0, 1, 2]
    ));
    assert!(dataset.lookup_all("nothing*").unwrap().is_empty());
    assert!(matches!(
        dataset.lookup("nothing*"),
        Err(LookupError::NotFound(_))
    ));
    assert!(matches!(
        dataset.channel(7usize),
        Err(DataSetError::Lookup(LookupError::IndexOutOfRange { index: 7, len: 3 }))
    ));
}

#[test]
fn test_corrupt_cache_falls_back_to_captures() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_session(dir.path());
    let mut corrupt = Vec::new();
    write_cache_file(&mut corrupt, &[10, -20, 30]).unwrap();
    corrupt[12..20].copy_from_slice(&u64::MAX.to_le_bytes());
    std::fs::write(dir.path().join("cm1.j"), corrupt).unwrap();

    let dataset = open(&manifest).unwrap();
    let cm1 = dataset.channel("*CM1").unwrap();
    assert_eq!(cm1.len(), 6 * SAMPLES_PER_PACKET);
    assert_eq!(cm1.values()[40], count(40, 0) as f64 * 2.0 + 0.5);
}

#[test]
fn test_reads_after_close_fail_for_every_backend() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_session(dir.path());
    let capture = dir.path().join("c1-0.dat");
    let archive_path = dir.path().join("export.uff");
    let mut writer = UffWriter::new(std::fs::File::create(&archive_path).unwrap());
    writer
        .write_channel(&open(&capture).unwrap().read_at(0).unwrap(), 1)
        .unwrap();
    drop(writer);

    for path in [manifest, capture, archive_path] {
        let mut dataset = open(&path).unwrap();
        let len = dataset.len();
        assert!(dataset.read_at(0).is_ok());
        dataset.close();
        assert_eq!(dataset.len(), len);
        assert!(matches!(dataset.read_at(0), Err(DataSetError::Closed)));
        assert!(matches!(dataset.channel(0usize), Err(DataSetError::Closed)));
    }
}

#[test]
fn test_keys_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = open(&write_session(dir.path())).unwrap();

    let key = ChannelKey::try_from(&json!("*SP3")).unwrap();
    assert_eq!(dataset.lookup(key).unwrap(), 2);
    let key = ChannelKey::try_from(&json!(1)).unwrap();
    assert_eq!(dataset.info(key).unwrap().id1(), "513-BS01-CM2");
    assert!(matches!(
        ChannelKey::try_from(&json!(1.5)),
        Err(LookupError::WrongKeyType(_))
    ));
    assert!(matches!(
        ChannelKey::try_from(&json!({"Name": "CM1"})),
        Err(LookupError::WrongKeyType(_))
    ));
}

#[test]
fn test_raw_capture_exported_to_uff() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("c1-0.dat");
    write_capture(&capture, 0, &[1, 2, 3, 4]);

    let raw = open(&capture).unwrap();
    assert_eq!(raw.backend(), Backend::RawPacketStream);
    assert_eq!(raw.len(), 32);
    let ch2 = raw.channel("ch2").unwrap();
    assert_eq!(ch2.len(), 4 * SAMPLES_PER_PACKET);
    assert_eq!(ch2.values()[17], count(17, 1) as f64);
    assert!((ch2.info().abscissa.inc - 4e-6).abs() < 1e-12);

    let archive_path = dir.path().join("export.uff");
    let mut writer = UffWriter::new(std::fs::File::create(&archive_path).unwrap());
    for channel in raw.channels("ch[1-3]").unwrap() {
        writer.write_channel(&channel, 1).unwrap();
    }
    drop(writer);

    let mut archive = open(&archive_path).unwrap();
    assert_eq!(archive.backend(), Backend::Uff58Archive);
    assert_eq!(archive.len(), 3);
    let back = archive.channel("ch2").unwrap();
    assert_eq!(back.values(), ch2.values());
    assert_eq!(back.info().unit, "adc");
    assert!((back.info().abscissa.inc - 4e-6).abs() < 1e-12);
    assert!(back.info().uff.is_some());

    archive.close();
    assert!(archive.read_at(0).is_err());
}

#[test]
fn test_open_unknown_and_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello\nworld\n").unwrap();
    assert!(matches!(
        open(&path),
        Err(DataSetError::BadMagic { ref magic, .. }) if magic == "hello"
    ));
    assert!(matches!(
        open(&dir.path().join("missing.dat")),
        Err(DataSetError::BadFilePath(_))
    ));
}
