#![cfg(target_os = "linux")]

use rusty_dreams_cortex::probe::HostAdapterSource;
use rusty_dreams_cortex::CapabilityProbe;
use std::fs;

#[async_std::test]
async fn test_render_node_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("dev/dri")).unwrap();
    fs::write(root.join("dev/dri/renderD128"), "").unwrap();
    fs::write(root.join("dev/dri/card0"), "").unwrap();
    let device = root.join("sys/class/drm/renderD128/device");
    fs::create_dir_all(&device).unwrap();
    fs::write(device.join("vendor"), "0x1002\n").unwrap();
    fs::write(device.join("device"), "0x744c\n").unwrap();

    let report = CapabilityProbe::with_source(HostAdapterSource::with_root(root))
        .probe()
        .await;

    assert!(report.supported, "{}", report.diagnostic);
    let info = report.adapter_info.unwrap();
    assert_eq!(info.vendor, "AMD");
    assert_eq!(info.device, "0x744c");
    assert_eq!(info.architecture, "Unknown");
}

#[async_std::test]
async fn test_dri_without_render_node_has_no_adapter() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("dev/dri")).unwrap();
    fs::write(root.join("dev/dri/card0"), "").unwrap();

    let report = CapabilityProbe::with_source(HostAdapterSource::with_root(root))
        .probe()
        .await;

    assert!(!report.supported);
    assert!(report.diagnostic.contains("no compatible adapter"));
}

#[async_std::test]
async fn test_nvidia_device_node_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("dev")).unwrap();
    fs::write(root.join("dev/nvidia0"), "").unwrap();

    let report = CapabilityProbe::with_source(HostAdapterSource::with_root(root))
        .probe()
        .await;

    assert!(report.supported);
    assert_eq!(report.adapter_info.unwrap().vendor, "NVIDIA");
}

#[async_std::test]
async fn test_bare_host_is_unsupported() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let first = CapabilityProbe::with_source(HostAdapterSource::with_root(root))
        .probe()
        .await;
    assert!(!first.supported);
    assert!(first.diagnostic.contains("no DRM render nodes"));
}
