//! # ApkVm
//!
//! A library for installing Android APK packages and running their bytecode
//! on a minimal Dalvik-subset register VM
//!
use std::path::Path;

pub mod apk;
pub mod dex;
pub mod runtime;
#[cfg(test)]
mod tests;
pub mod vm;

pub use apk::{ApkPackage, ContainerError, ExtractCache, ManifestFormat};
pub use dex::{DexError, ParsedDex};
pub use runtime::{AndroidRuntime, InstallError, InstalledApp};
pub use vm::{InterpreterFault, Value};

/// Reads an APK from disk and extracts it, using the file stem as the label
/// hint.
///
/// # Examples
///
/// ```no_run
///  use apkvm::read_apk_file;
///  use std::path::Path;
///
///  let package = read_apk_file(Path::new("app-release.apk")).unwrap();
///  println!("{} contains {} dex images.", package.package_name, package.dex_images.len());
/// ```
pub fn read_apk_file(path: &Path) -> Result<ApkPackage, ContainerError> {
    let bytes = std::fs::read(path)?;
    let hint = path.file_name().and_then(|n| n.to_str());
    apk::extract(&bytes, hint)
}
