use std::collections::HashMap;

use crate::dex::{self, ClassDef};
use crate::tests::fixtures::{build_dex, ClassSpec, MethodSpec};
use crate::vm::{CallLog, FrameworkShim, Interpreter, InterpreterFault, ObjectHeap, Value, VmThread};

fn class_table(image: &[u8]) -> HashMap<String, ClassDef> {
    dex::parse(image)
        .unwrap()
        .classes
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect()
}

fn single_method_table(
    name: &'static str,
    params: Vec<&'static str>,
    ret: &'static str,
    registers: u16,
    insns: Vec<u16>,
) -> HashMap<String, ClassDef> {
    class_table(&build_dex(&[ClassSpec {
        descriptor: "Lcom/example/Unit;",
        superclass: "Ljava/lang/Object;",
        methods: vec![MethodSpec { name, params, ret, code: Some((registers, insns)) }],
    }]))
}

fn invoke(
    classes: &HashMap<String, ClassDef>,
    method: &str,
    descriptor: &str,
    args: &[Value],
) -> Result<Value, InterpreterFault> {
    let shim = FrameworkShim::new();
    let interpreter = Interpreter::new(classes, &shim);
    let mut thread = VmThread::new(1);
    let mut log = CallLog::new();
    interpreter.invoke(&mut thread, &mut log, "com.example.Unit", method, descriptor, args)
}

#[test]
fn void_method_with_two_registers_accepts_zero_args() {
    let classes = single_method_table("run", vec![], "V", 2, vec![0x000e]);
    assert_eq!(invoke(&classes, "run", "()V", &[]), Ok(Value::Void));
}

#[test]
fn const4_loads_signed_immediate() {
    // const/4 v0, #5; return v0
    let classes = single_method_table("five", vec![], "I", 1, vec![0x501a, 0x000f]);
    assert_eq!(invoke(&classes, "five", "()I", &[]), Ok(Value::Int(5)));

    // const/4 v0, #-3 (0xd sign-extends to -3); return v0
    let classes = single_method_table("minus", vec![], "I", 1, vec![0xd01a, 0x000f]);
    assert_eq!(invoke(&classes, "minus", "()I", &[]), Ok(Value::Int(-3)));
}

#[test]
fn move_copies_between_registers() {
    // const/4 v1, #6; move v0, v1; return v0
    let classes = single_method_table("moved", vec![], "I", 2, vec![0x611a, 0x1001, 0x000f]);
    assert_eq!(invoke(&classes, "moved", "()I", &[]), Ok(Value::Int(6)));
}

#[test]
fn arguments_bind_to_low_registers() {
    // return v0
    let classes = single_method_table("echo", vec!["I"], "I", 2, vec![0x000f]);
    assert_eq!(invoke(&classes, "echo", "(I)I", &[Value::Int(42)]), Ok(Value::Int(42)));
}

#[test]
fn unknown_opcodes_are_skipped() {
    // 0xff is unassigned; execution continues to the const and return
    let classes = single_method_table("skips", vec![], "I", 1, vec![0x00ff, 0x501a, 0x000f]);
    assert_eq!(invoke(&classes, "skips", "()I", &[]), Ok(Value::Int(5)));
}

#[test]
fn invoke_marker_consumes_three_units() {
    // invoke-virtual marker followed by two operand units that would read as
    // a return and a nop if misinterpreted as opcodes
    let classes = single_method_table(
        "marked",
        vec![],
        "I",
        1,
        vec![0x106e, 0x000f, 0x0000, 0x701a, 0x000f],
    );
    assert_eq!(invoke(&classes, "marked", "()I", &[]), Ok(Value::Int(7)));
}

#[test]
fn falling_off_the_stream_returns_void() {
    let classes = single_method_table("drift", vec![], "V", 1, vec![0x0000, 0x0000]);
    assert_eq!(invoke(&classes, "drift", "()V", &[]), Ok(Value::Void));
}

#[test]
fn out_of_range_register_is_a_hard_fault() {
    // return v9 in a 2-register frame
    let classes = single_method_table("bad", vec![], "I", 2, vec![0x090f]);
    assert_eq!(
        invoke(&classes, "bad", "()I", &[]),
        Err(InterpreterFault::BadRegister { index: 9, frame_size: 2 })
    );
}

#[test]
fn unresolved_methods_fall_back_to_shim_then_noop() {
    let classes = HashMap::new();
    let shim = FrameworkShim::new();
    let interpreter = Interpreter::new(&classes, &shim);
    let mut thread = VmThread::new(1);
    let mut log = CallLog::new();

    let result = interpreter.invoke(
        &mut thread,
        &mut log,
        "android.app.Activity",
        "onCreate",
        "(Landroid/os/Bundle;)V",
        &[Value::Null],
    );
    assert_eq!(result, Ok(Value::Void));

    let result = interpreter.invoke(
        &mut thread,
        &mut log,
        "com.missing.Nowhere",
        "frobnicate",
        "()V",
        &[],
    );
    assert_eq!(result, Ok(Value::Void));

    assert_eq!(
        log.entries(),
        &[
            "shim:android.app.Activity.onCreate".to_string(),
            "noop:com.missing.Nowhere.frobnicate".to_string(),
        ]
    );
}

#[test]
fn shim_bundle_and_system_respond() {
    let shim = FrameworkShim::new();
    let get_string = shim.resolve("android.os.Bundle", "getString").unwrap();
    assert_eq!(get_string.call(&[]), Value::Null);

    let println = shim.resolve("java.lang.System", "println").unwrap();
    assert_eq!(println.call(&[Value::String("hello".into())]), Value::Void);

    assert!(shim.resolve("android.app.Activity", "onBackPressed").is_none());
    assert!(shim.resolve("java.util.ArrayList", "add").is_none());
}

#[test]
fn heap_assigns_monotonic_object_ids() {
    let mut heap = ObjectHeap::new();
    let a = heap.create_object("android.os.Bundle");
    let b = heap.create_object("com.example.Widget");
    assert!(b > a);
    assert_eq!(heap.get(a).unwrap().class_name, "android.os.Bundle");
    assert_eq!(heap.get(b).unwrap().class_name, "com.example.Widget");
    assert_eq!(heap.len(), 2);
}

#[test]
fn bodiless_method_invocation_is_a_noop() {
    let classes = class_table(&build_dex(&[ClassSpec {
        descriptor: "Lcom/example/Unit;",
        superclass: "Ljava/lang/Object;",
        methods: vec![MethodSpec { name: "native0", params: vec![], ret: "V", code: None }],
    }]));
    assert_eq!(invoke(&classes, "native0", "()V", &[]), Ok(Value::Void));
}
