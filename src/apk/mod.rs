pub mod cache;

pub use cache::{CacheKey, ExtractCache};

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::thread;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use zip::read::ZipArchive;

/// Result alias for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors surfaced by the APK container layer. Only structural failures are
/// fatal; individual bad entries inside a valid archive are skipped.
#[derive(Debug)]
pub enum ContainerError {
    NotAZip,
    EntryReadFailure(String),
    Io(io::Error),
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerError::NotAZip => write!(f, "input is not a ZIP archive"),
            ContainerError::EntryReadFailure(name) => write!(f, "failed to read entry {name}"),
            ContainerError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ContainerError {}

impl From<io::Error> for ContainerError {
    fn from(value: io::Error) -> Self {
        ContainerError::Io(value)
    }
}

/// How the manifest entry was interpreted, so heuristic-derived metadata is
/// distinguishable from manifest-derived metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ManifestFormat {
    /// Plain-text XML; metadata was read from it.
    Text,
    /// Binary-encoded XML; left unparsed, metadata came from fallbacks.
    Binary,
    /// No `AndroidManifest.xml` entry at all.
    #[default]
    Missing,
}

/// Everything extracted from one APK upload. Immutable after extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApkPackage {
    pub package_name: String,
    pub version_code: u32,
    pub version_name: String,
    pub min_sdk: u32,
    pub target_sdk: u32,
    pub label: String,
    /// DEX images ordered by entry name for deterministic multi-dex merging.
    pub dex_images: Vec<Vec<u8>>,
    /// Entries under `res/` and `assets/`, keyed by full entry name.
    pub resources: BTreeMap<String, Vec<u8>>,
    /// Entries under `lib/<abi>/` ending in `.so`, keyed by base filename.
    pub native_libraries: BTreeMap<String, Vec<u8>>,
    pub manifest: String,
    pub manifest_format: ManifestFormat,
}

const DEFAULT_MIN_SDK: u32 = 21;
const DEFAULT_TARGET_SDK: u32 = 33;

/// Opens an APK byte buffer and extracts DEX images, manifest, resources and
/// native libraries, then recovers whatever metadata it can. The extraction
/// branches run in parallel, each over its own archive handle; they write to
/// disjoint outputs and are joined before metadata recovery runs.
pub fn extract(apk_bytes: &[u8], file_name_hint: Option<&str>) -> ContainerResult<ApkPackage> {
    let names: Vec<String> = {
        let archive =
            ZipArchive::new(Cursor::new(apk_bytes)).map_err(|_| ContainerError::NotAZip)?;
        archive.file_names().map(str::to_string).collect()
    };

    let (dex_images, (manifest, manifest_format), resources, native_libraries) =
        thread::scope(|s| {
            let dex = s.spawn(|| extract_dex_images(apk_bytes, &names));
            let manifest = s.spawn(|| extract_manifest(apk_bytes, &names));
            let resources = s.spawn(|| extract_resources(apk_bytes, &names));
            let libs = s.spawn(|| extract_native_libraries(apk_bytes, &names));
            (
                join_branch(dex.join(), "dex images"),
                join_branch(manifest.join(), "manifest"),
                join_branch(resources.join(), "resources"),
                join_branch(libs.join(), "native libraries"),
            )
        });

    let metadata = recover_metadata(&manifest, &dex_images, file_name_hint);

    Ok(ApkPackage {
        package_name: metadata.package_name,
        version_code: metadata.version_code,
        version_name: metadata.version_name,
        min_sdk: metadata.min_sdk,
        target_sdk: metadata.target_sdk,
        label: metadata.label,
        dex_images,
        resources,
        native_libraries,
        manifest,
        manifest_format,
    })
}

/// `extract`, backed by a bounded cache so a byte-identical upload is not
/// re-parsed.
pub fn extract_cached(
    apk_bytes: &[u8],
    file_name_hint: Option<&str>,
    cache: &mut ExtractCache,
) -> ContainerResult<ApkPackage> {
    let key = CacheKey::for_bytes(apk_bytes);
    if let Some(package) = cache.get(&key) {
        debug!("[apk] extraction cache hit for {} byte upload", apk_bytes.len());
        return Ok(package.clone());
    }
    let package = extract(apk_bytes, file_name_hint)?;
    cache.insert(key, package.clone());
    Ok(package)
}

fn join_branch<T: Default>(result: thread::Result<T>, what: &str) -> T {
    match result {
        Ok(v) => v,
        Err(_) => {
            warn!("[apk] {what} extraction branch panicked, continuing without it");
            T::default()
        }
    }
}

fn open_archive(bytes: &[u8]) -> Option<ZipArchive<Cursor<&[u8]>>> {
    // The caller already validated the archive once; a failure here means a
    // racing truncation of the buffer, which cannot happen with a slice.
    ZipArchive::new(Cursor::new(bytes)).ok()
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> ContainerResult<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| ContainerError::EntryReadFailure(name.to_string()))?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|_| ContainerError::EntryReadFailure(name.to_string()))?;
    Ok(data)
}

fn extract_dex_images(bytes: &[u8], names: &[String]) -> Vec<Vec<u8>> {
    let mut dex_names: Vec<&String> = names.iter().filter(|n| n.ends_with(".dex")).collect();
    dex_names.sort();

    let Some(mut archive) = open_archive(bytes) else { return vec![] };
    let mut images = Vec::with_capacity(dex_names.len());
    for name in dex_names {
        match read_entry(&mut archive, name) {
            Ok(data) => images.push(data),
            Err(e) => warn!("[apk] skipping unreadable DEX entry: {e}"),
        }
    }
    images
}

fn extract_manifest(bytes: &[u8], names: &[String]) -> (String, ManifestFormat) {
    if !names.iter().any(|n| n == "AndroidManifest.xml") {
        return (String::new(), ManifestFormat::Missing);
    }
    let Some(mut archive) = open_archive(bytes) else {
        return (String::new(), ManifestFormat::Missing);
    };
    let data = match read_entry(&mut archive, "AndroidManifest.xml") {
        Ok(data) => data,
        Err(e) => {
            warn!("[apk] manifest entry unreadable: {e}");
            return (String::new(), ManifestFormat::Missing);
        }
    };

    let text = String::from_utf8_lossy(&data);
    if text.contains("<?xml") || text.contains("<manifest") {
        (text.into_owned(), ManifestFormat::Text)
    } else {
        // Binary AXML; read only as best-effort text, so leave it unparsed
        (String::new(), ManifestFormat::Binary)
    }
}

fn extract_resources(bytes: &[u8], names: &[String]) -> BTreeMap<String, Vec<u8>> {
    let mut resources = BTreeMap::new();
    let Some(mut archive) = open_archive(bytes) else { return resources };
    for name in names {
        if name.ends_with('/') {
            continue;
        }
        if !(name.starts_with("res/") || name.starts_with("assets/")) {
            continue;
        }
        match read_entry(&mut archive, name) {
            Ok(data) => {
                resources.insert(name.clone(), data);
            }
            Err(e) => warn!("[apk] skipping unreadable resource entry: {e}"),
        }
    }
    resources
}

fn extract_native_libraries(bytes: &[u8], names: &[String]) -> BTreeMap<String, Vec<u8>> {
    let mut libraries = BTreeMap::new();
    let Some(mut archive) = open_archive(bytes) else { return libraries };
    for name in names {
        if !(name.starts_with("lib/") && name.ends_with(".so")) {
            continue;
        }
        let base = name.rsplit('/').next().unwrap_or(name).to_string();
        match read_entry(&mut archive, name) {
            Ok(data) => {
                libraries.insert(base, data);
            }
            Err(e) => warn!("[apk] skipping unreadable native library: {e}"),
        }
    }
    libraries
}

/* Best-effort metadata recovery */

static PACKAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"package\s*=\s*"([^"]*)""#).unwrap());
static VERSION_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"versionCode\s*=\s*"(\d+)""#).unwrap());
static VERSION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"versionName\s*=\s*"([^"]*)""#).unwrap());
static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"android:label\s*=\s*"([^"]*)""#).unwrap());
static MIN_SDK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"minSdkVersion\s*=\s*"(\d+)""#).unwrap());
static TARGET_SDK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"targetSdkVersion\s*=\s*"(\d+)""#).unwrap());

struct Metadata {
    package_name: String,
    version_code: u32,
    version_name: String,
    label: String,
    min_sdk: u32,
    target_sdk: u32,
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn recover_metadata(manifest: &str, dex_images: &[Vec<u8>], hint: Option<&str>) -> Metadata {
    let mut package_name = capture(&PACKAGE_RE, manifest).unwrap_or("").to_string();
    let version_code = capture(&VERSION_CODE_RE, manifest)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let version_name = capture(&VERSION_NAME_RE, manifest).unwrap_or("1.0").to_string();
    let min_sdk = capture(&MIN_SDK_RE, manifest)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MIN_SDK);
    let target_sdk = capture(&TARGET_SDK_RE, manifest)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TARGET_SDK);

    let mut label = match capture(&LABEL_RE, manifest) {
        // A resource reference is formatted as a label, not resolved
        Some(raw) if raw.starts_with('@') => {
            let resource_name = raw.rsplit('/').next().unwrap_or(raw);
            humanize_resource_name(resource_name)
        }
        Some(raw) => raw.to_string(),
        None => String::new(),
    };

    if package_name.is_empty() {
        if let Some(first_dex) = dex_images.first() {
            // Synthesize a stable package name from the image's leading bytes
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&first_dex[..first_dex.len().min(64)]);
            package_name = format!("apk.pkg{:08x}", hasher.finalize());
        } else {
            package_name = "unknown".to_string();
        }
    }

    if label.is_empty() {
        label = match hint {
            Some(hint) if !hint.is_empty() => label_from_hint(hint),
            _ => String::new(),
        };
    }
    if label.is_empty() {
        let last_segment = package_name.rsplit('.').next().unwrap_or(&package_name);
        label = title_case(&[last_segment.to_string()]);
    }

    Metadata { package_name, version_code, version_name, label, min_sdk, target_sdk }
}

/// `app_name` -> `App Name`
fn humanize_resource_name(name: &str) -> String {
    let words: Vec<String> = name
        .split('_')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    title_case(&words)
}

/// `MyCoolApp.apk` -> `My Cool App`; splits camelCase, kebab and snake case.
fn label_from_hint(hint: &str) -> String {
    let stem = match hint.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.eq_ignore_ascii_case("apk") => stem,
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => hint,
    };
    let stem = stem.rsplit('/').next().unwrap_or(stem);

    let mut words: Vec<String> = vec![];
    for chunk in stem.split(['-', '_', ' ']) {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in chunk.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                words.push(current.clone());
                current.clear();
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    title_case(&words)
}

fn title_case(words: &[String]) -> String {
    let mut out = String::new();
    for word in words {
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}
