use std::fs;

use approx::assert_relative_eq;
use galaxy_core::*;
use galaxy_storage::{load, load_config, load_config_or_default, save, save_config};

fn sample(n: u32) -> Vec<Body> {
    (0..n)
        .map(|i| {
            let x = i as f32;
            Body::new(i, [x, -x * 0.5, 0.25], [1e-5 * x, 0.0, -2e-6], 0.1 + x)
        })
        .collect()
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/run/galaxy.glxy");
    let bodies = sample(37);

    save(&bodies, &path).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 12 + 37 * 28);

    let loaded = load(&path, 10).unwrap();
    assert_eq!(loaded.len(), bodies.len());
    for (a, b) in loaded.iter().zip(&bodies) {
        assert_eq!(a.index, b.index);
        for k in 0..3 {
            assert_relative_eq!(a.position[k], b.position[k]);
            assert_relative_eq!(a.velocity[k], b.velocity[k]);
        }
        assert_relative_eq!(a.mass, b.mass);
    }
}

#[test]
fn bad_magic_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.glxy");
    save(&sample(4), &path).unwrap();

    let mut data = fs::read(&path).unwrap();
    data[..4].copy_from_slice(b"NOPE");
    fs::write(&path, data).unwrap();

    assert!(matches!(
        load(&path, 1),
        Err(IoError::BadMagic { found }) if &found == b"NOPE"
    ));
}

#[test]
fn unknown_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.glxy");
    save(&sample(4), &path).unwrap();

    let mut data = fs::read(&path).unwrap();
    data[4..8].copy_from_slice(&7u32.to_le_bytes());
    fs::write(&path, data).unwrap();

    assert!(matches!(load(&path, 1), Err(IoError::BadVersion { found: 7 })));
}

#[test]
fn too_few_bodies_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.glxy");
    save(&sample(5), &path).unwrap();

    assert!(matches!(
        load(&path, 6),
        Err(IoError::InsufficientBodies {
            required: 6,
            found: 5
        })
    ));
    assert_eq!(load(&path, 5).unwrap().len(), 5);
}

#[test]
fn truncated_payload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.glxy");
    save(&sample(8), &path).unwrap();

    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 10]).unwrap();
    assert!(matches!(load(&path, 1), Err(IoError::ReadFailure { .. })));

    let mut padded = data.clone();
    padded.extend_from_slice(&[0u8; 3]);
    fs::write(&path, padded).unwrap();
    assert!(matches!(load(&path, 1), Err(IoError::ReadFailure { .. })));
}

#[test]
fn missing_file_is_an_open_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load(&dir.path().join("absent.glxy"), 0),
        Err(IoError::Open { .. })
    ));
}

#[test]
fn config_persists_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.bin");

    let config = SimConfig {
        body_count: 1234,
        seed: 7,
        device: DeviceSelection {
            platform: 1,
            device: 2,
        },
        generation: GenerationSettings::collision(5.0, 9.0, 40.0, 1e-4),
        ..SimConfig::default()
    };
    save_config(&config, &path).unwrap();
    assert_eq!(load_config(&path).unwrap(), config);
}

#[test]
fn missing_config_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
        load_config_or_default(&dir.path().join("none.bin")),
        SimConfig::default()
    );
}

#[test]
fn non_positive_mass_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("massless.glxy");
    save(&sample(4), &path).unwrap();
    let data = fs::read(&path).unwrap();
    let mass_at = 12 + 2 * 28 + 24;

    for bad in [0.0f32, -1.0, f32::NAN, f32::INFINITY] {
        let mut patched = data.clone();
        patched[mass_at..mass_at + 4].copy_from_slice(&bad.to_le_bytes());
        fs::write(&path, patched).unwrap();
        assert!(matches!(load(&path, 1), Err(IoError::ReadFailure { .. })));
    }
}
