//! Integration tests for the native table.
//!
//! Every test drives natives through `Natives::invoke` with raw parameter
//! cells, the same way an interpreter would, against in-memory machines.

use std::sync::{Arc, OnceLock, Weak};

use amxkit_common::address;
use amxkit_common::sleep::{DEFAULT_FORK_LEVEL, FORK_COPY_DATA};
use amxkit_common::{Cell, ErrorCode, InstanceId, SleepCode, SleepKind};
use amxkit_natives::source;
use amxkit_natives::{
    Entry, ForeignCall, ForkInfo, Host, Instance, Machine, MachineLayout, NativeError, Natives,
    Registry,
};
use parking_lot::Mutex;

// ============================================================
// Helper functions
// ============================================================

/// One call the host was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Recorded {
    source: InstanceId,
    target: InstanceId,
    function: String,
    entry: Entry,
    format: String,
    values: Vec<Cell>,
}

/// Host double: records calls and answers with `target * 10`. Functions
/// named `Boom`, and any call into a `failing` target, fail with
/// `AMX_ERR_INDEX`.
#[derive(Default)]
struct RecordingHost {
    calls: Mutex<Vec<Recorded>>,
    strings: Mutex<Vec<String>>,
    failing: Mutex<Vec<InstanceId>>,
}

impl RecordingHost {
    fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().clone()
    }

    fn targets(&self) -> Vec<InstanceId> {
        self.calls.lock().iter().map(|c| c.target).collect()
    }
}

impl Host for RecordingHost {
    fn invoke(&self, call: &ForeignCall<'_>) -> Result<Cell, ErrorCode> {
        self.calls.lock().push(Recorded {
            source: call.source,
            target: call.target,
            function: call.function.to_owned(),
            entry: call.entry,
            format: call.args.format.clone(),
            values: call.args.values.clone(),
        });
        if call.function == "Boom" || self.failing.lock().contains(&call.target) {
            return Err(ErrorCode::INDEX);
        }
        Ok(call.target.to_cell() * 10)
    }

    fn create_string(&self, value: &str) -> Cell {
        let mut strings = self.strings.lock();
        strings.push(value.to_owned());
        strings.len() as Cell
    }
}

struct Fixture {
    registry: Arc<Registry>,
    host: Arc<RecordingHost>,
    natives: Natives,
}

fn fixture() -> Fixture {
    let registry = Arc::new(Registry::new());
    let host = Arc::new(RecordingHost::default());
    let natives = Natives::new(Arc::clone(&registry), Arc::clone(&host) as Arc<dyn Host>);
    Fixture {
        registry,
        host,
        natives,
    }
}

/// A script with three publics, one native and one public variable.
fn script(name: &str) -> Machine {
    Machine::new(name, MachineLayout::default())
        .with_public("OnInit")
        .with_public("OnTick")
        .with_public("Boom")
        .with_native("print", 0x1234)
        .with_pubvar("g_Count", 8)
}

fn load(f: &Fixture, name: &str) -> (InstanceId, Arc<Mutex<Machine>>) {
    let machine = Arc::new(Mutex::new(script(name)));
    let id = f.registry.register(Arc::clone(&machine));
    (id, machine)
}

/// Store a zero-terminated unpacked string at `address`.
fn put_string(machine: &Arc<Mutex<Machine>>, address: Cell, value: &str) {
    let mut machine = machine.lock();
    let mut at = address;
    for c in value.chars() {
        machine.set_cell(at, c as Cell).unwrap();
        at += 4;
    }
    machine.set_cell(at, 0).unwrap();
}

fn cell(machine: &Arc<Mutex<Machine>>, address: Cell) -> Cell {
    machine.lock().cell(address).unwrap()
}

fn status(machine: &Arc<Mutex<Machine>>) -> ErrorCode {
    machine.lock().error()
}

fn sleep(code: Cell) -> (SleepKind, Cell) {
    let code = SleepCode::decode(code).expect("not a sleep code");
    (code.kind(), code.payload())
}

const FUNC: Cell = 100;
const FORMAT: Cell = 140;
const RESULT: Cell = 180;

// ============================================================
// Identity
// ============================================================

#[test]
fn this_is_the_caller() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    assert_eq!(f.natives.invoke(a, "amx_this", &[]), Ok(a.to_cell()));
}

#[test]
fn handle_wraps_the_caller() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let id = f.natives.invoke(a, "amx_handle", &[]).unwrap();
    let handle = f.natives.handles().get(id).unwrap();
    assert_eq!(handle.value.as_amx(), Some(a));
    assert_eq!(handle.context, a);
    assert!(handle.owned);
}

#[test]
fn source_follows_the_guard() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let (b, _) = load(&f, "b");
    assert_eq!(f.natives.invoke(a, "amx_source", &[]), Ok(0));
    assert_eq!(f.natives.invoke(a, "amx_source_handle", &[]), Ok(0));

    let _guard = source::enter(Some(b));
    assert_eq!(f.natives.invoke(a, "amx_source", &[]), Ok(b.to_cell()));
    let id = f.natives.invoke(a, "amx_source_handle", &[]).unwrap();
    assert_eq!(f.natives.handles().get(id).unwrap().value.as_amx(), Some(b));
}

#[test]
fn name_is_truncated_to_buffer() {
    let f = fixture();
    let (a, machine) = load(&f, "alpha");
    assert_eq!(f.natives.invoke(a, "amx_name", &[RESULT, 4]), Ok(5));
    let written: Vec<Cell> = (0..4).map(|i| cell(&machine, RESULT + i * 4)).collect();
    assert_eq!(written, vec!['a' as Cell, 'l' as Cell, 'p' as Cell, 0]);
}

#[test]
fn name_length_counts_bytes() {
    let f = fixture();
    let (a, _) = load(&f, "ñandú");
    assert_eq!(f.natives.invoke(a, "amx_name", &[RESULT, 16]), Ok(7));
}

#[test]
fn name_string_goes_through_host() {
    let f = fixture();
    let (a, _) = load(&f, "alpha");
    assert_eq!(f.natives.invoke(a, "amx_name_s", &[]), Ok(1));
    assert_eq!(*f.host.strings.lock(), vec!["alpha".to_owned()]);
}

// ============================================================
// Public functions
// ============================================================

#[test]
fn public_lookup() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    assert_eq!(f.natives.invoke(a, "amx_num_publics", &[]), Ok(3));

    put_string(&machine, FUNC, "OnTick");
    assert_eq!(f.natives.invoke(a, "amx_public_index", &[FUNC]), Ok(1));
    put_string(&machine, FUNC, "Missing");
    assert_eq!(f.natives.invoke(a, "amx_public_index", &[FUNC]), Ok(-1));
}

#[test]
fn empty_public_name_is_fatal() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    assert_eq!(
        f.natives.invoke(a, "amx_public_index", &[FORMAT]),
        Err(NativeError::ArgEmpty { arg: "function" })
    );
    assert_eq!(status(&machine), ErrorCode::NATIVE);
}

#[test]
fn public_name_by_index() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    assert_eq!(f.natives.invoke(a, "amx_public_name", &[1, RESULT, 16]), Ok(6));
    assert_eq!(cell(&machine, RESULT), 'O' as Cell);
    assert_eq!(cell(&machine, RESULT + 6 * 4), 0);
    assert_eq!(
        f.natives.invoke(a, "amx_public_name", &[3, RESULT, 16]),
        Err(NativeError::OutOfRange { what: "index" })
    );
    assert_eq!(f.natives.invoke(a, "amx_public_name_s", &[0]), Ok(1));
    assert_eq!(*f.host.strings.lock(), vec!["OnInit".to_owned()]);
}

#[test]
fn encode_public_tokens() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    assert_eq!(f.natives.invoke(a, "amx_encode_public", &[0, RESULT]), Ok(1));
    assert_eq!(cell(&machine, RESULT), 0x1B00_0000 | (1 << 16) | (1 << 8));
    assert_eq!(f.natives.invoke(a, "amx_encode_public", &[65024, RESULT]), Ok(1));
    assert_eq!(address::decode_public(cell(&machine, RESULT)), Ok(65024));
    assert_eq!(
        f.natives.invoke(a, "amx_encode_public", &[65025, RESULT]),
        Err(NativeError::OutOfRange { what: "index" })
    );
}

#[test]
fn encode_native_tokens() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    put_string(&machine, FUNC, "print");
    assert_eq!(f.natives.invoke(a, "amx_encode_native", &[FUNC, RESULT]), Ok(1));
    let token = [cell(&machine, RESULT), cell(&machine, RESULT + 4)];
    assert_eq!(token, address::encode_native(0x1234).unwrap());
    assert_eq!(address::decode_native(token), Ok(0x1234));

    put_string(&machine, FUNC, "nope");
    assert_eq!(
        f.natives.invoke(a, "amx_encode_native", &[FUNC, RESULT]),
        Err(NativeError::FunctionNotFound {
            kind: "native",
            name: "nope".to_owned()
        })
    );
}

// ============================================================
// Variable references
// ============================================================

#[test]
fn var_is_valid_until_deleted() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let var = f.natives.invoke(a, "amx_var", &[16]).unwrap();
    assert_eq!(f.natives.invoke(a, "amx_valid", &[var]), Ok(1));
    assert_eq!(f.natives.invoke(a, "amx_delete", &[var]), Ok(1));
    assert_eq!(f.natives.invoke(a, "amx_valid", &[var]), Ok(0));
    assert_eq!(
        f.natives.invoke(a, "amx_delete", &[var]),
        Err(NativeError::InvalidPointer {
            kind: "AMX variable",
            value: var
        })
    );
}

#[test]
fn unknown_ids_are_not_found_in_both_pools() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    assert_eq!(f.natives.invoke(a, "amx_valid", &[12345]), Ok(0));
    assert!(f.natives.vars().resolve(0).is_none());
    assert!(f.natives.vars().resolve(12345).is_none());
    assert!(f.natives.handles().get(0).is_none());
    assert!(f.natives.handles().get(12345).is_none());
    assert!(matches!(
        f.natives.invoke(a, "amx_get", &[12345]),
        Err(NativeError::InvalidPointer { .. })
    ));
}

#[test]
fn stale_ids_never_resolve() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let first = f.natives.invoke(a, "amx_var", &[0]).unwrap();
    f.natives.invoke(a, "amx_delete", &[first]).unwrap();
    let second = f.natives.invoke(a, "amx_var", &[4]).unwrap();
    assert_ne!(first, second);
    assert_eq!(f.natives.invoke(a, "amx_valid", &[first]), Ok(0));
    assert_eq!(f.natives.invoke(a, "amx_valid", &[second]), Ok(1));
}

#[test]
fn set_returns_previous_value() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let var = f.natives.invoke(a, "amx_var_arr", &[32, 3]).unwrap();
    assert_eq!(f.natives.invoke(a, "amx_set", &[var, 5]), Ok(0));
    assert_eq!(f.natives.invoke(a, "amx_set", &[var, 7]), Ok(5));
    assert_eq!(f.natives.invoke(a, "amx_set", &[var, 9, 2]), Ok(0));
    assert_eq!(f.natives.invoke(a, "amx_get", &[var]), Ok(7));
    assert_eq!(cell(&machine, 40), 9);
    assert_eq!(f.natives.invoke(a, "amx_sizeof", &[var]), Ok(3));
}

#[test]
fn array_index_past_the_end() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let var = f.natives.invoke(a, "amx_var_arr", &[32, 3]).unwrap();
    assert_eq!(
        f.natives.invoke(a, "amx_get", &[var, 3]),
        Err(NativeError::IndexOutOfBounds { index: 3, size: 3 })
    );
    assert_eq!(status(&machine), ErrorCode::NATIVE);
    assert_eq!(
        f.natives.invoke(a, "amx_set", &[var, 1, -1]),
        Err(NativeError::IndexOutOfBounds { index: -1, size: 3 })
    );
}

#[test]
fn public_var_binds_by_name() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    put_string(&machine, FUNC, "g_Count");
    let var = f.natives.invoke(a, "amx_public_var", &[FUNC]).unwrap();
    f.natives.invoke(a, "amx_set", &[var, 42]).unwrap();
    assert_eq!(cell(&machine, 8), 42);

    put_string(&machine, FUNC, "g_None");
    assert_eq!(
        f.natives.invoke(a, "amx_public_var", &[FUNC]),
        Err(NativeError::VarNotFound {
            kind: "public",
            name: "g_None".to_owned()
        })
    );
}

#[test]
fn stack_var_unlinks_when_popped() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let address = machine.lock().push(3).unwrap();
    let var = f.natives.invoke(a, "amx_var", &[address]).unwrap();
    assert_eq!(f.natives.invoke(a, "amx_linked", &[var]), Ok(1));
    assert_eq!(f.natives.invoke(a, "amx_inside", &[var]), Ok(1));
    machine.lock().pop().unwrap();
    assert_eq!(f.natives.invoke(a, "amx_linked", &[var]), Ok(0));
    assert_eq!(f.natives.invoke(a, "amx_inside", &[var]), Ok(0));
    assert_eq!(f.natives.invoke(a, "amx_valid", &[var]), Ok(1));
}

#[test]
fn ownership_queries() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let (b, _) = load(&f, "b");
    let var = f.natives.invoke(a, "amx_var", &[40]).unwrap();
    assert_eq!(f.natives.invoke(a, "amx_my", &[var]), Ok(1));
    assert_eq!(f.natives.invoke(b, "amx_my", &[var]), Ok(0));

    assert_eq!(f.natives.invoke(a, "amx_to_ref", &[var, 32]), Ok(1));
    assert_eq!(cell(&machine, 32), 8);
    assert_eq!(
        f.natives.invoke(b, "amx_to_ref", &[var, 32]),
        Err(NativeError::OperationNotSupported {
            kind: "AMX variable",
            value: var
        })
    );
}

#[test]
fn free_dynamic_storage() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let base = machine.lock().alloc_dynamic(4).unwrap();
    let var = f.natives.invoke(a, "amx_var_arr", &[base, 4]).unwrap();
    assert_eq!(f.natives.invoke(a, "amx_linked", &[var]), Ok(1));
    assert_eq!(f.natives.invoke(a, "amx_inside", &[var]), Ok(0));

    let code = f.natives.invoke(a, "amx_free", &[var]).unwrap();
    assert_eq!(sleep(code), (SleepKind::FreeVar, base));
    assert_eq!(status(&machine), ErrorCode::SLEEP);
    assert_eq!(f.natives.invoke(a, "amx_valid", &[var]), Ok(1));
    assert_eq!(f.natives.invoke(a, "amx_linked", &[var]), Ok(0));
}

#[test]
fn free_stack_storage_is_fatal() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let address = machine.lock().push(1).unwrap();
    let var = f.natives.invoke(a, "amx_var", &[address]).unwrap();
    assert_eq!(
        f.natives.invoke(a, "amx_free", &[var]),
        Err(NativeError::OperationNotSupported {
            kind: "AMX variable",
            value: var
        })
    );
    assert_eq!(status(&machine), ErrorCode::NATIVE);
    assert_eq!(f.natives.invoke(a, "amx_linked", &[var]), Ok(1));
}

#[test]
fn free_by_another_instance_is_fatal() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let (b, _) = load(&f, "b");
    let base = machine.lock().alloc_dynamic(1).unwrap();
    let var = f.natives.invoke(a, "amx_var", &[base]).unwrap();
    assert!(matches!(
        f.natives.invoke(b, "amx_free", &[var]),
        Err(NativeError::OperationNotSupported { .. })
    ));
    assert_eq!(machine.lock().dynamic_blocks(), 1);
}

#[test]
fn teardown_reclaims_vars() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let (b, _) = load(&f, "b");
    let mine = f.natives.invoke(a, "amx_var", &[0]).unwrap();
    let theirs = f.natives.invoke(b, "amx_var", &[0]).unwrap();
    f.registry.unload(b);
    assert_eq!(f.natives.invoke(a, "amx_valid", &[theirs]), Ok(0));
    assert_eq!(f.natives.invoke(a, "amx_valid", &[mine]), Ok(1));
    assert_eq!(f.natives.vars().len(), 1);
}

#[test]
fn to_ref_of_deleted_var_is_invalid() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let var = f.natives.invoke(a, "amx_var", &[40]).unwrap();
    f.natives.invoke(a, "amx_delete", &[var]).unwrap();
    assert_eq!(
        f.natives.invoke(a, "amx_to_ref", &[var, 32]),
        Err(NativeError::InvalidPointer {
            kind: "AMX variable",
            value: var
        })
    );
}

#[test]
fn ids_stay_dead_across_many_reuses() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let first = f.natives.invoke(a, "amx_var", &[0]).unwrap();
    f.natives.invoke(a, "amx_delete", &[first]).unwrap();
    let mut seen = vec![first];
    for _ in 0..2100 {
        let var = f.natives.invoke(a, "amx_var", &[0]).unwrap();
        assert!(!seen.contains(&var), "id {var} was issued twice");
        assert_eq!(f.natives.invoke(a, "amx_valid", &[first]), Ok(0));
        seen.push(var);
        f.natives.invoke(a, "amx_delete", &[var]).unwrap();
    }
    assert!(f.natives.vars().is_empty());
}

#[test]
fn teardown_reclaims_handles() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let (b, _) = load(&f, "b");
    let mine = f.natives.invoke(a, "amx_handle", &[]).unwrap();
    let theirs = f.natives.invoke(b, "amx_handle", &[]).unwrap();
    f.registry.unload(b);
    assert!(f.natives.handles().get(theirs).is_none());
    assert!(f.natives.handles().get(mine).is_some());
    assert_eq!(f.natives.handles().len(), 1);
}

// ============================================================
// Cross-instance calls
// ============================================================

#[test]
fn others_broadcast_skips_caller() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let (b, machine) = load(&f, "b");
    let (c, _) = load(&f, "c");
    put_string(&machine, FUNC, "OnTick");

    let result = f.natives.invoke(b, "amx_call_public", &[-2, FUNC, FORMAT]);
    assert_eq!(result, Ok(c.to_cell() * 10));
    assert_eq!(f.host.targets(), vec![a, c]);
    assert!(f.host.calls().iter().all(|call| call.source == b));
    assert!(f
        .host
        .calls()
        .iter()
        .all(|call| call.entry == Entry::Public(1)));
}

#[test]
fn all_broadcast_includes_caller() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let (b, machine) = load(&f, "b");
    put_string(&machine, FUNC, "OnInit");
    assert_eq!(
        f.natives.invoke(b, "amx_call_public", &[-1, FUNC, FORMAT]),
        Ok(b.to_cell() * 10)
    );
    assert_eq!(f.host.targets(), vec![a, b]);
}

#[test]
fn arguments_reach_the_host() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let (b, _) = load(&f, "b");
    put_string(&machine, FUNC, "print");
    put_string(&machine, FORMAT, "dd");
    f.natives
        .invoke(a, "amx_call_native", &[b.to_cell(), FUNC, FORMAT, 3, 4])
        .unwrap();
    assert_eq!(
        f.host.calls(),
        vec![Recorded {
            source: a,
            target: b,
            function: "print".to_owned(),
            entry: Entry::Native(0x1234),
            format: "dd".to_owned(),
            values: vec![3, 4],
        }]
    );
}

#[test]
fn call_to_dead_instance() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let (b, machine) = load(&f, "b");
    f.registry.unload(a);
    put_string(&machine, FUNC, "OnTick");

    assert_eq!(
        f.natives.invoke(b, "amx_call_public", &[a.to_cell(), FUNC, FORMAT]),
        Err(NativeError::InvalidPointer {
            kind: "AMX",
            value: a.to_cell()
        })
    );
    assert_eq!(status(&machine), ErrorCode::NATIVE);

    machine.lock().take_error();
    machine.lock().set_cell(RESULT, -7).unwrap();
    assert_eq!(
        f.natives
            .invoke(b, "amx_try_call_public", &[a.to_cell(), FUNC, RESULT, FORMAT]),
        Ok(ErrorCode::NOTFOUND.0)
    );
    assert_eq!(cell(&machine, RESULT), -7);
    assert_eq!(status(&machine), ErrorCode::NONE);
    assert!(f.host.calls().is_empty());
}

#[test]
fn try_call_writes_result_on_success() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let (b, _) = load(&f, "b");
    put_string(&machine, FUNC, "OnTick");
    assert_eq!(
        f.natives
            .invoke(a, "amx_try_call_public", &[b.to_cell(), FUNC, RESULT, FORMAT]),
        Ok(0)
    );
    assert_eq!(cell(&machine, RESULT), b.to_cell() * 10);
}

#[test]
fn target_failure_fatal_or_recovered() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let (b, _) = load(&f, "b");
    put_string(&machine, FUNC, "Boom");

    assert_eq!(
        f.natives.invoke(a, "amx_call_public", &[b.to_cell(), FUNC, FORMAT]),
        Err(NativeError::CallFailed {
            function: "Boom".to_owned(),
            code: ErrorCode::INDEX
        })
    );
    machine.lock().take_error();
    assert_eq!(
        f.natives
            .invoke(a, "amx_try_call_public", &[b.to_cell(), FUNC, RESULT, FORMAT]),
        Ok(ErrorCode::INDEX.0)
    );
    assert_eq!(cell(&machine, RESULT), 0);
}

#[test]
fn missing_function_in_target() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let (b, _) = load(&f, "b");
    put_string(&machine, FUNC, "Nope");
    assert_eq!(
        f.natives.invoke(a, "amx_call_public", &[b.to_cell(), FUNC, FORMAT]),
        Err(NativeError::FunctionNotFound {
            kind: "public",
            name: "Nope".to_owned()
        })
    );
    assert_eq!(
        f.natives
            .invoke(a, "amx_try_call_native", &[b.to_cell(), FUNC, RESULT, FORMAT]),
        Ok(ErrorCode::NOTFOUND.0)
    );
}

#[test]
fn call_into_self() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    put_string(&machine, FUNC, "OnInit");
    assert_eq!(
        f.natives.invoke(a, "amx_call_public", &[a.to_cell(), FUNC, FORMAT]),
        Ok(a.to_cell() * 10)
    );
}

#[test]
fn try_broadcast_keeps_last_status_and_last_success() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let (b, _) = load(&f, "b");
    let (c, _) = load(&f, "c");
    f.host.failing.lock().push(c);
    put_string(&machine, FUNC, "OnTick");

    assert_eq!(
        f.natives
            .invoke(a, "amx_try_call_public", &[-1, FUNC, RESULT, FORMAT]),
        Ok(ErrorCode::INDEX.0)
    );
    assert_eq!(cell(&machine, RESULT), b.to_cell() * 10);
    assert_eq!(f.host.targets(), vec![a, b, c]);
    assert_eq!(status(&machine), ErrorCode::NONE);
}

#[test]
fn try_others_broadcast_writes_last_result() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let (b, machine) = load(&f, "b");
    let (c, _) = load(&f, "c");
    put_string(&machine, FUNC, "OnTick");

    assert_eq!(
        f.natives
            .invoke(b, "amx_try_call_public", &[-2, FUNC, RESULT, FORMAT]),
        Ok(0)
    );
    assert_eq!(cell(&machine, RESULT), c.to_cell() * 10);
    assert_eq!(f.host.targets(), vec![a, c]);
}

#[test]
fn try_broadcast_with_no_success_leaves_result() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    load(&f, "b");
    put_string(&machine, FUNC, "Boom");
    machine.lock().set_cell(RESULT, -7).unwrap();

    assert_eq!(
        f.natives
            .invoke(a, "amx_try_call_public", &[-2, FUNC, RESULT, FORMAT]),
        Ok(ErrorCode::INDEX.0)
    );
    assert_eq!(cell(&machine, RESULT), -7);
}

#[test]
fn broadcast_stops_at_failing_target() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let (b, _) = load(&f, "b");
    load(&f, "c");
    f.host.failing.lock().push(b);
    put_string(&machine, FUNC, "OnTick");

    assert_eq!(
        f.natives.invoke(a, "amx_call_public", &[-1, FUNC, FORMAT]),
        Err(NativeError::CallFailed {
            function: "OnTick".to_owned(),
            code: ErrorCode::INDEX
        })
    );
    assert_eq!(f.host.targets(), vec![a, b]);
    assert_eq!(status(&machine), ErrorCode::NATIVE);
}

/// Host that unloads one instance while running the first call it gets.
struct UnloadingHost {
    registry: Arc<Registry>,
    victim: Mutex<Option<InstanceId>>,
    targets: Mutex<Vec<InstanceId>>,
}

impl Host for UnloadingHost {
    fn invoke(&self, call: &ForeignCall<'_>) -> Result<Cell, ErrorCode> {
        self.targets.lock().push(call.target);
        if let Some(victim) = self.victim.lock().take() {
            self.registry.unload(victim);
        }
        Ok(call.target.to_cell())
    }

    fn create_string(&self, _: &str) -> Cell {
        0
    }
}

#[test]
fn target_unloaded_mid_broadcast_is_skipped() {
    for try_mode in [false, true] {
        let registry = Arc::new(Registry::new());
        let host = Arc::new(UnloadingHost {
            registry: Arc::clone(&registry),
            victim: Mutex::new(None),
            targets: Mutex::new(Vec::new()),
        });
        let natives = Natives::new(Arc::clone(&registry), Arc::clone(&host) as Arc<dyn Host>);
        let machine = Arc::new(Mutex::new(script("a")));
        let a = registry.register(Arc::clone(&machine));
        let b = registry.register(Arc::new(Mutex::new(script("b"))));
        let c = registry.register(Arc::new(Mutex::new(script("c"))));
        *host.victim.lock() = Some(c);
        put_string(&machine, FUNC, "OnTick");

        if try_mode {
            assert_eq!(
                natives.invoke(a, "amx_try_call_public", &[-1, FUNC, RESULT, FORMAT]),
                Ok(0)
            );
            assert_eq!(cell(&machine, RESULT), b.to_cell());
        } else {
            assert_eq!(
                natives.invoke(a, "amx_call_public", &[-1, FUNC, FORMAT]),
                Ok(b.to_cell())
            );
        }
        assert_eq!(*host.targets.lock(), vec![a, b]);
        assert!(!registry.is_live(c));
    }
}

/// Host that runs natives of the target from inside the call.
#[derive(Default)]
struct ReentrantHost {
    natives: OnceLock<Weak<Natives>>,
}

impl Host for ReentrantHost {
    fn invoke(&self, call: &ForeignCall<'_>) -> Result<Cell, ErrorCode> {
        let natives = self
            .natives
            .get()
            .and_then(Weak::upgrade)
            .ok_or(ErrorCode::GENERAL)?;
        let var = natives
            .invoke(call.target, "amx_var", &[16])
            .map_err(|_| ErrorCode::NATIVE)?;
        natives
            .invoke(call.target, "amx_set", &[var, 99])
            .map_err(|_| ErrorCode::NATIVE)?;
        natives
            .invoke(call.target, "amx_this", &[])
            .map_err(|_| ErrorCode::NATIVE)
    }

    fn create_string(&self, _: &str) -> Cell {
        0
    }
}

#[test]
fn host_can_reenter_the_calling_instance() {
    let registry = Arc::new(Registry::new());
    let host = Arc::new(ReentrantHost::default());
    let natives = Arc::new(Natives::new(
        Arc::clone(&registry),
        Arc::clone(&host) as Arc<dyn Host>,
    ));
    host.natives.set(Arc::downgrade(&natives)).unwrap();
    let machine = Arc::new(Mutex::new(script("a")));
    let a = registry.register(Arc::clone(&machine));
    put_string(&machine, FUNC, "OnInit");

    assert_eq!(
        natives.invoke(a, "amx_call_public", &[a.to_cell(), FUNC, FORMAT]),
        Ok(a.to_cell())
    );
    assert_eq!(cell(&machine, 16), 99);
    assert_eq!(status(&machine), ErrorCode::NONE);
}

// ============================================================
// Suspend requests
// ============================================================

#[test]
fn fork_with_defaults() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    let code = f.natives.invoke(a, "amx_fork", &[]).unwrap();
    assert_eq!(status(&machine), ErrorCode::SLEEP);
    assert_eq!(
        sleep(code),
        (SleepKind::Fork, DEFAULT_FORK_LEVEL | FORK_COPY_DATA)
    );
    assert_eq!(code as u32 & 0xFF00_0000, SleepKind::Fork.tag());
    let context = f.registry.load_context(a).unwrap();
    assert_eq!(context.lock().extra::<ForkInfo>().copied(), Some(ForkInfo::default()));
}

#[test]
fn fork_stores_output_addresses() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let code = f.natives.invoke(a, "amx_fork", &[1, 64, 0, 68]).unwrap();
    assert_eq!(sleep(code), (SleepKind::Fork, 1));
    let context = f.registry.load_context(a).unwrap();
    assert_eq!(
        context.lock().extra::<ForkInfo>().copied(),
        Some(ForkInfo {
            result_address: Some(64),
            error_address: Some(68),
        })
    );
}

#[test]
fn fork_accepts_address_zero() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let code = f.natives.invoke(a, "amx_fork", &[2, 0, 1, 4]).unwrap();
    assert_eq!(sleep(code), (SleepKind::Fork, 2 | FORK_COPY_DATA));
    let context = f.registry.load_context(a).unwrap();
    assert_eq!(
        context.lock().extra::<ForkInfo>().copied(),
        Some(ForkInfo {
            result_address: Some(0),
            error_address: Some(4),
        })
    );
}

#[test]
fn fork_family_codes() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let commit = f.natives.invoke(a, "amx_commit", &[]).unwrap();
    assert_eq!(sleep(commit), (SleepKind::ForkCommit, 1));
    let commit = f.natives.invoke(a, "amx_commit", &[33]).unwrap();
    assert_eq!(sleep(commit), (SleepKind::ForkCommit, 33));
    let end = f.natives.invoke(a, "amx_fork_end", &[]).unwrap();
    assert_eq!(sleep(end).0, SleepKind::ForkEnd);
}

#[test]
fn alloc_and_parallel_codes() {
    let f = fixture();
    let (a, _) = load(&f, "a");
    let zeroed = f.natives.invoke(a, "amx_alloc", &[8]).unwrap();
    assert_eq!(sleep(zeroed), (SleepKind::AllocVarZero, 8));
    let raw = f.natives.invoke(a, "amx_alloc", &[8, 0]).unwrap();
    assert_eq!(sleep(raw), (SleepKind::AllocVar, 8));

    let begin = f.natives.invoke(a, "amx_parallel_begin", &[]).unwrap();
    assert_eq!(sleep(begin), (SleepKind::Parallel, 1));
    let end = f.natives.invoke(a, "amx_parallel_end", &[]).unwrap();
    assert_eq!(sleep(end).0, SleepKind::ParallelEnd);
    let tail = f.natives.invoke(a, "amx_tailcall", &[]).unwrap();
    assert_eq!(sleep(tail).0, SleepKind::TailCall);
}

#[test]
fn error_raises_arbitrary_code() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    assert_eq!(f.natives.invoke(a, "amx_error", &[321, 5]), Ok(5));
    assert_eq!(status(&machine), ErrorCode(321));
    assert_eq!(f.natives.invoke(a, "amx_error", &[ErrorCode::EXIT.0]), Ok(0));
    assert_eq!(status(&machine), ErrorCode::EXIT);
}

// ============================================================
// Table boundary
// ============================================================

#[test]
fn unknown_native_is_fatal() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    assert_eq!(
        f.natives.invoke(a, "amx_nope", &[]),
        Err(NativeError::FunctionNotFound {
            kind: "native",
            name: "amx_nope".to_owned()
        })
    );
    assert_eq!(status(&machine), ErrorCode::NATIVE);
}

#[test]
fn missing_parameters_are_fatal() {
    let f = fixture();
    let (a, machine) = load(&f, "a");
    assert_eq!(
        f.natives.invoke(a, "amx_var_arr", &[0]),
        Err(NativeError::TooFewParams {
            expected: 2,
            got: 1
        })
    );
    assert_eq!(status(&machine), ErrorCode::NATIVE);
}
