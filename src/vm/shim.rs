use log::info;

use crate::vm::Value;

/// A built-in callable. Shim methods are side-effect-free stand-ins; logging
/// is their only observable behavior besides the returned value.
pub type ShimFn = fn(&[Value]) -> Value;

/// The closed set of framework classes the shim knows. Lookup is exact-name
/// only; there is no inheritance resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimClass {
    Activity,
    Context,
    Bundle,
    Log,
    System,
}

impl ShimClass {
    pub fn from_name(name: &str) -> Option<ShimClass> {
        match name {
            "android.app.Activity" => Some(ShimClass::Activity),
            "android.content.Context" => Some(ShimClass::Context),
            "android.os.Bundle" => Some(ShimClass::Bundle),
            "android.util.Log" => Some(ShimClass::Log),
            "java.lang.System" => Some(ShimClass::System),
            _ => None,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            ShimClass::Activity => "android.app.Activity",
            ShimClass::Context => "android.content.Context",
            ShimClass::Bundle => "android.os.Bundle",
            ShimClass::Log => "android.util.Log",
            ShimClass::System => "java.lang.System",
        }
    }

    fn method_table(&self) -> &'static [(&'static str, ShimFn)] {
        match self {
            ShimClass::Activity => ACTIVITY_METHODS,
            ShimClass::Context => CONTEXT_METHODS,
            ShimClass::Bundle => BUNDLE_METHODS,
            ShimClass::Log => LOG_METHODS,
            ShimClass::System => SYSTEM_METHODS,
        }
    }
}

const ACTIVITY_METHODS: &[(&str, ShimFn)] = &[
    ("onCreate", activity_on_create),
    ("onStart", activity_on_start),
    ("onResume", activity_on_resume),
    ("onPause", activity_on_pause),
    ("onStop", activity_on_stop),
    ("onDestroy", activity_on_destroy),
];

const CONTEXT_METHODS: &[(&str, ShimFn)] = &[
    ("getPackageName", context_get_package_name),
    ("getApplicationContext", return_null),
];

const BUNDLE_METHODS: &[(&str, ShimFn)] = &[("<init>", return_void), ("getString", return_null)];

const LOG_METHODS: &[(&str, ShimFn)] = &[("d", log_print), ("i", log_print), ("e", log_print)];

const SYSTEM_METHODS: &[(&str, ShimFn)] = &[("println", system_println)];

/// One resolved shim entry: the owning class and the callable.
#[derive(Clone, Copy)]
pub struct ShimMethod {
    pub class: ShimClass,
    pub name: &'static str,
    func: ShimFn,
}

impl ShimMethod {
    pub fn call(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }
}

/// Fixed registry of well-known framework classes, consulted when a method
/// cannot be resolved from loaded application code.
pub struct FrameworkShim;

impl FrameworkShim {
    pub fn new() -> Self {
        FrameworkShim
    }

    pub fn resolve(&self, class_name: &str, method_name: &str) -> Option<ShimMethod> {
        let class = ShimClass::from_name(class_name)?;
        class
            .method_table()
            .iter()
            .find(|&&(name, _)| name == method_name)
            .map(|&(name, func)| ShimMethod { class, name, func })
    }
}

impl Default for FrameworkShim {
    fn default() -> Self {
        FrameworkShim::new()
    }
}

fn return_void(_args: &[Value]) -> Value {
    Value::Void
}

fn return_null(_args: &[Value]) -> Value {
    Value::Null
}

fn activity_on_create(_args: &[Value]) -> Value {
    info!("[shim] Activity.onCreate");
    Value::Void
}

fn activity_on_start(_args: &[Value]) -> Value {
    info!("[shim] Activity.onStart");
    Value::Void
}

fn activity_on_resume(_args: &[Value]) -> Value {
    info!("[shim] Activity.onResume");
    Value::Void
}

fn activity_on_pause(_args: &[Value]) -> Value {
    info!("[shim] Activity.onPause");
    Value::Void
}

fn activity_on_stop(_args: &[Value]) -> Value {
    info!("[shim] Activity.onStop");
    Value::Void
}

fn activity_on_destroy(_args: &[Value]) -> Value {
    info!("[shim] Activity.onDestroy");
    Value::Void
}

fn context_get_package_name(_args: &[Value]) -> Value {
    Value::String(String::new())
}

fn log_print(args: &[Value]) -> Value {
    match args {
        [tag, message, ..] => info!("[shim] Log {tag}: {message}"),
        [message] => info!("[shim] Log: {message}"),
        [] => info!("[shim] Log called with no arguments"),
    }
    Value::Void
}

fn system_println(args: &[Value]) -> Value {
    match args.first() {
        Some(arg) => info!("[System.out] {arg}"),
        None => info!("[System.out]"),
    }
    Value::Void
}
