use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::{error, info, warn};
use serde::Serialize;

use crate::apk::{self, ApkPackage, ContainerError, ExtractCache};
use crate::dex::{self, ClassDef};
use crate::vm::{CallLog, FrameworkShim, Interpreter, ObjectHeap, Value, VmThread};

/// Lifecycle callbacks invoked on launch, in order.
const LIFECYCLE: [(&str, &str); 3] = [
    ("onCreate", "(Landroid/os/Bundle;)V"),
    ("onStart", "()V"),
    ("onResume", "()V"),
];

/// Errors fatal to an install attempt. Per-image DEX failures are recovered
/// inside `install_apk` and never reach the caller.
#[derive(Debug)]
pub enum InstallError {
    Container(ContainerError),
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallError::Container(err) => write!(f, "container error: {err}"),
        }
    }
}

impl std::error::Error for InstallError {}

impl From<ContainerError> for InstallError {
    fn from(value: ContainerError) -> Self {
        InstallError::Container(value)
    }
}

/// The record an installed package leaves behind, exposed to the embedding
/// UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledApp {
    pub package_name: String,
    pub version_name: String,
    pub label: String,
    pub apk: ApkPackage,
}

/// Owns all mutable core state: the install table, the merged class table,
/// the extraction cache, the object heap and the call log. Nothing here is
/// process-global; create one per embedding context.
pub struct AndroidRuntime {
    apps: BTreeMap<String, InstalledApp>,
    classes: HashMap<String, ClassDef>,
    shim: FrameworkShim,
    cache: ExtractCache,
    heap: ObjectHeap,
    call_log: CallLog,
    running: Option<String>,
    next_thread_id: u64,
}

impl AndroidRuntime {
    pub fn new() -> Self {
        AndroidRuntime {
            apps: BTreeMap::new(),
            classes: HashMap::new(),
            shim: FrameworkShim::new(),
            cache: ExtractCache::new(),
            heap: ObjectHeap::new(),
            call_log: CallLog::new(),
            running: None,
            next_thread_id: 1,
        }
    }

    /// Extracts the APK, parses and merges every DEX image it can, and
    /// records the install. A corrupt image is logged and skipped; only
    /// container-level failures abort the install.
    pub fn install_apk(&mut self, apk_bytes: &[u8], file_name: &str) -> Result<(), InstallError> {
        let package = apk::extract_cached(apk_bytes, Some(file_name), &mut self.cache)?;

        let mut parsed_images = 0usize;
        for (n, image) in package.dex_images.iter().enumerate() {
            match dex::parse(image) {
                Ok(parsed) => {
                    parsed_images += 1;
                    self.merge_classes(parsed.classes);
                }
                Err(e) => {
                    error!("[runtime] DEX image #{n} of {} failed to parse: {e}", package.package_name);
                }
            }
        }
        if !package.native_libraries.is_empty() {
            info!(
                "[runtime] {} ships {} native libraries (not loaded)",
                package.package_name,
                package.native_libraries.len()
            );
        }

        let app = InstalledApp {
            package_name: package.package_name.clone(),
            version_name: package.version_name.clone(),
            label: package.label.clone(),
            apk: package,
        };
        info!(
            "[runtime] installed {} ({} of {} DEX images parsed)",
            app.package_name,
            parsed_images,
            app.apk.dex_images.len()
        );
        if self.apps.insert(app.package_name.clone(), app).is_some() {
            info!("[runtime] reinstall replaced a previous record");
        }
        Ok(())
    }

    fn merge_classes(&mut self, classes: Vec<ClassDef>) {
        for class in classes {
            // last-loaded image wins on a name collision
            if let Some(previous) = self.classes.insert(class.name.clone(), class) {
                info!("[runtime] class {} redefined by a later image", previous.name);
            }
        }
    }

    /// Launches an installed app: creates a thread and drives the lifecycle
    /// callbacks against `<package>.MainActivity`, best-effort. A fault in
    /// one callback is logged and the rest still run.
    pub fn launch_app(&mut self, package_name: &str) {
        if !self.apps.contains_key(package_name) {
            warn!("[runtime] launch of {package_name} ignored: not installed");
            return;
        }

        let mut thread = self.create_thread();
        let activity = format!("{package_name}.MainActivity");
        let bundle = Value::Object(self.heap.create_object("android.os.Bundle"));
        info!("[runtime] launching {package_name} on thread {}", thread.id());

        let interpreter = Interpreter::new(&self.classes, &self.shim);
        for (method_name, descriptor) in LIFECYCLE {
            let args: &[Value] =
                if method_name == "onCreate" { std::slice::from_ref(&bundle) } else { &[] };
            if let Err(fault) = interpreter.invoke(
                &mut thread,
                &mut self.call_log,
                &activity,
                method_name,
                descriptor,
                args,
            ) {
                error!("[runtime] {activity}.{method_name} faulted: {fault}");
            }
        }

        self.running = Some(package_name.to_string());
    }

    /// Removes an installed app. Returns whether anything was removed; if the
    /// app was running it transitions back to stopped.
    pub fn uninstall_app(&mut self, package_name: &str) -> bool {
        let removed = self.apps.remove(package_name).is_some();
        if removed {
            if self.running.as_deref() == Some(package_name) {
                info!("[runtime] uninstalling running app {package_name}, stopping it");
                self.running = None;
            }
            info!("[runtime] uninstalled {package_name}");
        } else {
            warn!("[runtime] uninstall of {package_name} ignored: not installed");
        }
        removed
    }

    pub fn installed_apps(&self) -> Vec<&InstalledApp> {
        self.apps.values().collect()
    }

    pub fn app_info(&self, package_name: &str) -> Option<&InstalledApp> {
        self.apps.get(package_name)
    }

    pub fn running_app(&self) -> Option<&str> {
        self.running.as_deref()
    }

    /// The merged class table across every installed DEX image.
    pub fn classes(&self) -> &HashMap<String, ClassDef> {
        &self.classes
    }

    pub fn call_log(&self) -> &[String] {
        self.call_log.entries()
    }

    /// Creates a new thread with a monotonically assigned id. Ids are never
    /// reused within a runtime's lifetime.
    pub fn create_thread(&mut self) -> VmThread {
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        VmThread::new(id)
    }
}

impl Default for AndroidRuntime {
    fn default() -> Self {
        AndroidRuntime::new()
    }
}
