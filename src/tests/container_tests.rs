use crate::apk::{self, CacheKey, ContainerError, ExtractCache, ManifestFormat};
use crate::tests::fixtures::{build_dex, build_zip, main_activity_dex, manifest_text};

#[test]
fn rejects_non_zip_input() {
    let err = apk::extract(b"this is not a zip archive at all", None).unwrap_err();
    assert!(matches!(err, ContainerError::NotAZip));

    let err = apk::extract(&[], None).unwrap_err();
    assert!(matches!(err, ContainerError::NotAZip));
}

#[test]
fn extracts_manifest_metadata_verbatim() {
    let manifest = manifest_text("com.example.app", 7, "2.3", "@string/app_name");
    let apk_bytes = build_zip(&[
        ("AndroidManifest.xml", manifest.as_bytes()),
        ("classes.dex", &main_activity_dex("com.example.app")),
        ("res/layout/main.xml", b"<LinearLayout/>"),
        ("assets/data.bin", &[1, 2, 3]),
        ("lib/arm64-v8a/libnative.so", b"\x7fELF"),
    ]);

    let package = apk::extract(&apk_bytes, Some("example.apk")).unwrap();
    assert_eq!(package.package_name, "com.example.app");
    assert_eq!(package.version_code, 7);
    assert_eq!(package.version_name, "2.3");
    assert_eq!(package.min_sdk, 24);
    assert_eq!(package.target_sdk, 34);
    assert_eq!(package.manifest_format, ManifestFormat::Text);
    // resource-reference labels are formatted, not resolved
    assert_eq!(package.label, "App Name");
    assert_eq!(package.dex_images.len(), 1);
    assert!(package.resources.contains_key("res/layout/main.xml"));
    assert!(package.resources.contains_key("assets/data.bin"));
    assert_eq!(package.native_libraries.get("libnative.so").map(Vec::as_slice), Some(&b"\x7fELF"[..]));
}

#[test]
fn binary_manifest_degrades_to_heuristics() {
    // AXML magic, nothing resembling text XML
    let binary_manifest = [0x03u8, 0x00, 0x08, 0x00, 0x9c, 0x01, 0x00, 0x00];
    let apk_bytes = build_zip(&[
        ("AndroidManifest.xml", &binary_manifest),
        ("classes.dex", &build_dex(&[])),
    ]);

    let package = apk::extract(&apk_bytes, None).unwrap();
    assert_eq!(package.manifest_format, ManifestFormat::Binary);
    assert!(package.manifest.is_empty());
    // package name is synthesized from the first DEX image's leading bytes
    assert!(package.package_name.starts_with("apk.pkg"));
    assert!(!package.package_name.is_empty());
}

#[test]
fn no_metadata_and_no_dex_falls_back_to_unknown() {
    let apk_bytes = build_zip(&[("assets/readme.txt", b"hello")]);
    let package = apk::extract(&apk_bytes, None).unwrap();
    assert_eq!(package.package_name, "unknown");
    assert_eq!(package.manifest_format, ManifestFormat::Missing);
    assert!(package.dex_images.is_empty());
}

#[test]
fn label_falls_back_to_filename_hint() {
    let apk_bytes = build_zip(&[("assets/readme.txt", b"hello")]);
    let package = apk::extract(&apk_bytes, Some("MyCoolApp.apk")).unwrap();
    assert_eq!(package.label, "My Cool App");

    let package = apk::extract(&apk_bytes, Some("gaming-booster_pro.apk")).unwrap();
    assert_eq!(package.label, "Gaming Booster Pro");
}

#[test]
fn multidex_images_are_ordered_by_entry_name() {
    let first = build_dex(&[]);
    let mut second = build_dex(&[]);
    second.push(0xAB); // make the images distinguishable
    let apk_bytes = build_zip(&[
        ("classes2.dex", &second),
        ("classes.dex", &first),
    ]);

    let package = apk::extract(&apk_bytes, None).unwrap();
    assert_eq!(package.dex_images.len(), 2);
    assert_eq!(package.dex_images[0], first);
    assert_eq!(package.dex_images[1], second);
}

#[test]
fn cache_returns_equal_result_for_identical_input() {
    let apk_bytes = build_zip(&[("classes.dex", &main_activity_dex("com.example.app"))]);
    let mut cache = ExtractCache::new();

    let first = apk::extract_cached(&apk_bytes, Some("app.apk"), &mut cache).unwrap();
    assert_eq!(cache.len(), 1);
    let second = apk::extract_cached(&apk_bytes, Some("app.apk"), &mut cache).unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);
}

#[test]
fn cache_evicts_oldest_beyond_capacity() {
    let mut cache = ExtractCache::new();
    let mut archives = vec![];
    for n in 0..11u8 {
        // distinct content per archive, so each gets its own key
        let name = "assets/data.bin";
        let payload = [n; 32];
        archives.push(build_zip(&[(name, &payload)]));
    }

    for bytes in &archives {
        apk::extract_cached(bytes, None, &mut cache).unwrap();
    }
    assert_eq!(cache.len(), 10);
    // the first archive was evicted, the second is still present
    assert!(cache.get(&CacheKey::for_bytes(&archives[0])).is_none());
    assert!(cache.get(&CacheKey::for_bytes(&archives[1])).is_some());
}
