//! Integration tests for class registration and member dispatch
//!
//! Tests cover:
//! - Typed instance creation and constructor arguments
//! - Script method, accessor, and native entry dispatch
//! - Inheritance through registered parent chains
//! - Registration conflicts and lookup failures
//! - Identity across engines sharing an isolate

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_bridge::{
    BridgeError, BridgeResult, ClassRegistry, ClassSpec, EngineContext, EngineOptions,
    EngineScope, HostClass, HostObject, Isolate, IsolateOptions, NativeCall, NativeTable,
    PeerHandle, ReclaimPolicy, ScriptTable, Value,
};

struct Account {
    balance: Mutex<i64>,
    owner: Mutex<String>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            balance: Mutex::new(0),
            owner: Mutex::new("unowned".to_string()),
        }
    }
}

impl HostObject for Account {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostClass for Account {
    const NAME: &'static str = "Account";

    fn native_bindings(table: &mut NativeTable) -> BridgeResult<()> {
        table.add("Open", "(s)o", account_open)?;
        table.add("Audit", "()s", account_audit)?;
        Ok(())
    }

    fn script_bindings(table: &mut ScriptTable) -> BridgeResult<()> {
        table.set_constructor(account_construct)?;
        table.add_method("deposit", account_deposit)?;
        table.add_method("withdraw", account_withdraw)?;
        table.add_accessor("balance", account_balance, None)?;
        table.add_accessor("owner", account_owner, Some(account_set_owner))?;
        Ok(())
    }
}

fn account_construct(
    _scope: &mut EngineScope<'_>,
    args: &[Value],
) -> BridgeResult<Box<dyn HostObject>> {
    let owner = match args.first() {
        Some(Value::Str(owner)) => owner.to_string(),
        Some(_) => return Err("owner must be a string".into()),
        None => "unowned".to_string(),
    };
    Ok(Box::new(Account {
        balance: Mutex::new(0),
        owner: Mutex::new(owner),
    }))
}

fn account_deposit(
    _scope: &mut EngineScope<'_>,
    peer: &PeerHandle,
    args: &[Value],
) -> BridgeResult<Value> {
    let account = peer.downcast_ref::<Account>().ok_or("not an Account")?;
    let amount = args
        .first()
        .and_then(Value::as_int)
        .ok_or("amount must be an integer")?;
    let mut balance = account.balance.lock();
    *balance += amount;
    Ok(Value::Int(*balance))
}

fn account_withdraw(
    _scope: &mut EngineScope<'_>,
    peer: &PeerHandle,
    args: &[Value],
) -> BridgeResult<Value> {
    let account = peer.downcast_ref::<Account>().ok_or("not an Account")?;
    let amount = args
        .first()
        .and_then(Value::as_int)
        .ok_or("amount must be an integer")?;
    let mut balance = account.balance.lock();
    if amount > *balance {
        return Err(format!("insufficient funds: have {}, want {amount}", *balance).into());
    }
    *balance -= amount;
    Ok(Value::Int(*balance))
}

fn account_balance(_scope: &mut EngineScope<'_>, peer: &PeerHandle) -> BridgeResult<Value> {
    let account = peer.downcast_ref::<Account>().ok_or("not an Account")?;
    Ok(Value::Int(*account.balance.lock()))
}

fn account_owner(_scope: &mut EngineScope<'_>, peer: &PeerHandle) -> BridgeResult<Value> {
    let account = peer.downcast_ref::<Account>().ok_or("not an Account")?;
    let owner = account.owner.lock().clone();
    Ok(Value::from(owner))
}

fn account_set_owner(
    _scope: &mut EngineScope<'_>,
    peer: &PeerHandle,
    value: Value,
) -> BridgeResult<()> {
    let account = peer.downcast_ref::<Account>().ok_or("not an Account")?;
    let owner = value.as_str().ok_or("owner must be a string")?;
    *account.owner.lock() = owner.to_string();
    Ok(())
}

fn account_open(scope: &mut EngineScope<'_>, call: NativeCall<'_>) -> BridgeResult<Value> {
    let peer = scope.construct("Account", call.args)?;
    Ok(Value::Object(peer.object_id()))
}

fn account_audit(_scope: &mut EngineScope<'_>, call: NativeCall<'_>) -> BridgeResult<Value> {
    let peer = call.receiver.ok_or("receiver required")?;
    let account = peer.downcast_ref::<Account>().ok_or("not an Account")?;
    let owner = account.owner.lock().clone();
    let balance = *account.balance.lock();
    Ok(Value::from(format!("{owner}: {balance}")))
}

#[derive(Default)]
struct Stream;

impl HostObject for Stream {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostClass for Stream {
    const NAME: &'static str = "Stream";

    fn script_bindings(table: &mut ScriptTable) -> BridgeResult<()> {
        table.add_method("stamp", stream_stamp)
    }
}

fn stream_stamp(
    scope: &mut EngineScope<'_>,
    peer: &PeerHandle,
    args: &[Value],
) -> BridgeResult<Value> {
    let mark = args.first().cloned().unwrap_or(Value::Bool(true));
    scope.set_property(peer.object_id(), "stamp", mark)?;
    Ok(Value::str(peer.class_name()))
}

#[derive(Default)]
struct FileStream {
    path: Mutex<String>,
}

impl HostObject for FileStream {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostClass for FileStream {
    const NAME: &'static str = "FileStream";
    const PARENT: Option<&'static str> = Some("Stream");

    fn script_bindings(table: &mut ScriptTable) -> BridgeResult<()> {
        table.add_accessor("path", file_path, Some(file_set_path))
    }
}

fn file_path(_scope: &mut EngineScope<'_>, peer: &PeerHandle) -> BridgeResult<Value> {
    let file = peer.downcast_ref::<FileStream>().ok_or("not a FileStream")?;
    let path = file.path.lock().clone();
    Ok(Value::from(path))
}

fn file_set_path(
    _scope: &mut EngineScope<'_>,
    peer: &PeerHandle,
    value: Value,
) -> BridgeResult<()> {
    let file = peer.downcast_ref::<FileStream>().ok_or("not a FileStream")?;
    let path = value.as_str().ok_or("path must be a string")?;
    *file.path.lock() = path.to_string();
    Ok(())
}

fn blank_stream() -> Box<dyn HostObject> {
    Box::new(Stream)
}

fn fixture_registry() -> Arc<ClassRegistry> {
    let registry = Arc::new(ClassRegistry::new());
    registry.register_class::<Account>().unwrap();
    registry.register_class::<Stream>().unwrap();
    registry.register_class::<FileStream>().unwrap();
    registry
}

fn fixture_engine() -> EngineContext {
    EngineContext::start(fixture_registry(), EngineOptions::default()).unwrap()
}

#[test]
fn test_create_typed_instance() {
    let engine = fixture_engine();
    let peer = engine.create_instance("Account").unwrap();

    assert_eq!(peer.class_name(), "Account");
    assert_eq!(*peer.downcast_ref::<Account>().unwrap().owner.lock(), "unowned");
    assert!(peer.wrapper().is_live());
    assert_eq!(engine.wrapper_count(), 1);
}

#[test]
fn test_constructor_arguments_reach_the_peer() {
    let engine = fixture_engine();

    let peer = engine.construct("Account", &[Value::str("ada")]).unwrap();
    assert_eq!(*peer.downcast_ref::<Account>().unwrap().owner.lock(), "ada");

    let err = engine.construct("Account", &[Value::Int(7)]).unwrap_err();
    assert!(matches!(err, BridgeError::Host(_)));

    // Stream binds no constructor
    let err = engine.construct("Stream", &[]).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::UnknownMember { name, .. } if name == "constructor"
    ));
}

#[test]
fn test_method_dispatch_updates_host_state() {
    let engine = fixture_engine();
    let peer = engine.construct("Account", &[Value::str("ada")]).unwrap();
    let id = peer.object_id();

    engine
        .enter(|scope| {
            assert_eq!(
                scope.call_script_method(id, "deposit", &[Value::Int(100)])?,
                Value::Int(100)
            );
            assert_eq!(
                scope.call_script_method(id, "deposit", &[Value::Int(50)])?,
                Value::Int(150)
            );
            assert_eq!(
                scope.call_script_method(id, "withdraw", &[Value::Int(30)])?,
                Value::Int(120)
            );
            Ok(())
        })
        .unwrap();
    assert_eq!(*peer.downcast_ref::<Account>().unwrap().balance.lock(), 120);

    let err = engine
        .enter(|scope| scope.call_script_method(id, "withdraw", &[Value::Int(1000)]))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Host(message) if message.contains("insufficient")
    ));
}

#[test]
fn test_accessors_read_write_and_readonly() {
    let engine = fixture_engine();
    let peer = engine.create_instance("Account").unwrap();
    let id = peer.object_id();

    engine
        .enter(|scope| {
            scope.call_script_method(id, "deposit", &[Value::Int(75)])?;
            assert_eq!(scope.get_bound_property(id, "balance")?, Value::Int(75));

            scope.set_bound_property(id, "owner", Value::str("grace"))?;
            assert_eq!(scope.get_bound_property(id, "owner")?, Value::str("grace"));
            Ok(())
        })
        .unwrap();
    assert_eq!(*peer.downcast_ref::<Account>().unwrap().owner.lock(), "grace");

    let err = engine
        .enter(|scope| scope.set_bound_property(id, "balance", Value::Int(0)))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ReadOnlyProperty { class, name } if class == "Account" && name == "balance"
    ));
}

#[test]
fn test_native_factory_and_receiver_entries() {
    let engine = fixture_engine();

    let opened = engine
        .call_native("Account", "Open", None, &[Value::str("lin")])
        .unwrap();
    let id = match opened {
        Value::Object(id) => id,
        other => panic!("expected an object, got {other:?}"),
    };

    // Host state follows host handles: the peer made inside `Open` went
    // away with its transient handle, so resolving the twin revives a
    // factory-fresh Account.
    let peer = engine.peer_of(id).unwrap();
    assert_eq!(*peer.downcast_ref::<Account>().unwrap().owner.lock(), "unowned");

    engine
        .enter(|scope| {
            scope.call_script_method(id, "deposit", &[Value::Int(12)])?;
            Ok(())
        })
        .unwrap();
    let audit = engine
        .call_native("Account", "Audit", Some(&peer), &[])
        .unwrap();
    assert_eq!(audit, Value::str("unowned: 12"));
}

#[test]
fn test_native_lookup_and_signature_errors() {
    let engine = fixture_engine();
    let peer = engine.create_instance("Account").unwrap();

    let err = engine
        .call_native("Account", "Open", None, &[Value::Int(3)])
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InvalidArguments { method, .. } if method == "Open"
    ));

    let err = engine
        .call_native("Account", "Audit", Some(&peer), &[Value::str("extra")])
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments { .. }));

    let err = engine.call_native("Account", "Close", None, &[]).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::UnknownMember { class, name } if class == "Account" && name == "Close"
    ));

    let err = engine.call_native("Ledger", "Open", None, &[]).unwrap_err();
    assert!(matches!(err, BridgeError::TypeNotRegistered(name) if name == "Ledger"));
}

#[test]
fn test_inherited_members_resolve_through_parent() {
    let engine = fixture_engine();
    let peer = engine.create_instance("FileStream").unwrap();
    let id = peer.object_id();

    engine
        .enter(|scope| {
            // `stamp` is bound on Stream, dispatched on a FileStream twin
            let stamped = scope.call_script_method(id, "stamp", &[])?;
            assert_eq!(stamped, Value::str("FileStream"));
            assert_eq!(scope.get_property(id, "stamp")?, Some(Value::Bool(true)));

            scope.set_bound_property(id, "path", Value::str("/var/log/app.log"))?;
            assert_eq!(
                scope.get_bound_property(id, "path")?,
                Value::str("/var/log/app.log")
            );
            Ok(())
        })
        .unwrap();

    // Installing the leaf installed its ancestor too
    let installed = engine.installed_classes();
    assert!(installed.iter().any(|name| name.as_ref() == "Stream"));
    assert!(installed.iter().any(|name| name.as_ref() == "FileStream"));

    let file = engine.registry().lookup("FileStream").unwrap();
    assert!(file.derives_from("Stream"));

    // Parent instances know nothing of subclass members
    let base = engine.create_instance("Stream").unwrap();
    let err = engine
        .enter(|scope| scope.get_bound_property(base.object_id(), "path"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownMember { .. }));
}

#[test]
fn test_unknown_member_on_script_dispatch() {
    let engine = fixture_engine();
    let peer = engine.create_instance("Account").unwrap();

    let err = engine
        .enter(|scope| scope.call_script_method(peer.object_id(), "transfer", &[]))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::UnknownMember { class, name } if class == "Account" && name == "transfer"
    ));

    let err = engine.create_instance("Ledger").unwrap_err();
    assert!(matches!(err, BridgeError::TypeNotRegistered(name) if name == "Ledger"));
}

#[test]
fn test_registration_conflicts() {
    let registry = fixture_registry();

    // Re-registering the same class is a no-op
    registry.register_class::<Account>().unwrap();
    assert_eq!(registry.len(), 3);

    // Same name under a different parent is refused
    let err = registry
        .register(ClassSpec::new("FileStream", blank_stream).with_parent("Account"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::DuplicateType { .. }));

    // Parents register before children
    let err = registry
        .register(ClassSpec::new("SocketStream", blank_stream).with_parent("NetStream"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::TypeNotRegistered(name) if name == "NetStream"));
}

#[test]
fn test_clashing_member_names_abort_registration() {
    fn clashing_bindings(table: &mut ScriptTable) -> BridgeResult<()> {
        table.add_method("size", stream_stamp)?;
        table.add_accessor("size", file_path, None)
    }

    let registry = fixture_registry();
    let err = registry
        .register(ClassSpec::new("Clashing", blank_stream).with_script(clashing_bindings))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::DuplicateName { class, name } if class == "Clashing" && name == "size"
    ));
    assert!(!registry.is_registered("Clashing"));
}

#[test]
fn test_plain_properties_through_the_scope() {
    let engine = fixture_engine();
    let peer = engine.create_instance("Account").unwrap();
    let id = peer.object_id();

    engine
        .enter(|scope| {
            scope.set_property(id, "note", Value::str("vip"))?;
            assert_eq!(scope.get_property(id, "note")?, Some(Value::str("vip")));
            assert_eq!(scope.get_property(id, "missing")?, None);

            scope.guard().delete_property(id, "note")?;
            assert_eq!(scope.get_property(id, "note")?, None);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_shared_isolate_engines_share_wrappers() {
    let isolate = Isolate::new(IsolateOptions::default());
    let registry = fixture_registry();
    let first = EngineContext::attach(
        isolate.clone(),
        registry.clone(),
        ReclaimPolicy::default(),
    )
    .unwrap();
    let second = EngineContext::attach(isolate, registry, ReclaimPolicy::default()).unwrap();

    let peer = first.construct("Account", &[Value::str("ada")]).unwrap();
    let id = peer.object_id();

    // The second engine resolves the same wrapper and the same live peer
    let twin = second.peer_of(id).unwrap();
    assert_eq!(twin.class_name(), "Account");
    assert_eq!(twin.handle_count(), 2);
    assert_eq!(*twin.downcast_ref::<Account>().unwrap().owner.lock(), "ada");

    second
        .enter(|scope| {
            scope.call_script_method(id, "deposit", &[Value::Int(5)])?;
            Ok(())
        })
        .unwrap();
    assert_eq!(*peer.downcast_ref::<Account>().unwrap().balance.lock(), 5);

    // The wrapper stays owned by the engine that created it
    assert_eq!(first.wrapper_count(), 1);
    assert_eq!(second.wrapper_count(), 0);
}
