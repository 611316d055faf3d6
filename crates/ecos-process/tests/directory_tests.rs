//! Service directory integration tests
//!
//! The directory process is simulated by a responder holding a small
//! name table and speaking the JSON protocol.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use ecos_hal_mock::{MockKernel, MockWorld};
use ecos_ipc::directory::{
    SERVICE_CMD_LOOKUP, SERVICE_CMD_REGISTER, SERVICE_CMD_UNREGISTER, STATUS_EXISTS,
    STATUS_NOT_FOUND, STATUS_OK,
};
use ecos_process::{
    msg, Feedback, IpcConfig, IpcContext, IpcError, LookupRequest, LookupResponse, RegisterRequest,
    SendFault, StatusResponse, UnregisterRequest,
};

const ME: u32 = 20;
const DIRECTORY: u32 = 1;

fn directory_world() -> (Arc<MockWorld>, Arc<Mutex<BTreeMap<String, u32>>>) {
    let world = MockWorld::new();
    let table: Arc<Mutex<BTreeMap<String, u32>>> = Arc::new(Mutex::new(BTreeMap::new()));

    let names = Arc::clone(&table);
    world.on_message(DIRECTORY, move |env| {
        let mut names = names.lock().unwrap();
        let response = match env.message_id {
            SERVICE_CMD_LOOKUP => {
                let req: LookupRequest = serde_json::from_slice(&env.payload).unwrap();
                let resp = match names.get(&req.service_name) {
                    Some(pid) => LookupResponse {
                        status: STATUS_OK,
                        pid: Some(*pid),
                    },
                    None => LookupResponse {
                        status: STATUS_NOT_FOUND,
                        pid: None,
                    },
                };
                serde_json::to_vec(&resp).unwrap()
            }
            SERVICE_CMD_REGISTER => {
                let req: RegisterRequest = serde_json::from_slice(&env.payload).unwrap();
                let status = if names.contains_key(&req.service_name) {
                    STATUS_EXISTS
                } else {
                    names.insert(req.service_name, req.pid);
                    STATUS_OK
                };
                serde_json::to_vec(&StatusResponse { status }).unwrap()
            }
            SERVICE_CMD_UNREGISTER => {
                let req: UnregisterRequest = serde_json::from_slice(&env.payload).unwrap();
                let status = match names.remove(&req.service_name) {
                    Some(_) => STATUS_OK,
                    None => STATUS_NOT_FOUND,
                };
                serde_json::to_vec(&StatusResponse { status }).unwrap()
            }
            _ => Vec::new(),
        };
        vec![Feedback::Delivered, Feedback::Received(response)]
    });

    (world, table)
}

fn context(world: &Arc<MockWorld>) -> IpcContext<MockKernel> {
    IpcContext::new(world.process(ME), IpcConfig::default())
}

#[test]
fn test_register_then_lookup() {
    let (world, _) = directory_world();
    let ctx = context(&world);
    let directory = ctx.directory();

    directory.register("vfs", 30).unwrap();
    assert_eq!(directory.lookup("vfs"), Ok(30));
}

#[test]
fn test_register_self_uses_own_pid() {
    let (world, table) = directory_world();
    let ctx = context(&world);

    ctx.directory().register_self("terminal").unwrap();
    assert_eq!(table.lock().unwrap().get("terminal"), Some(&ME));
}

#[test]
fn test_lookup_unknown_is_not_found() {
    let (world, _) = directory_world();
    let ctx = context(&world);

    let err = ctx.directory().lookup("nope").unwrap_err();
    assert_eq!(err, IpcError::NotFound);
    assert!(err.is_no_such_peer());
}

#[test]
fn test_duplicate_register_rejected() {
    let (world, _) = directory_world();
    let ctx = context(&world);
    let directory = ctx.directory();

    directory.register("vfs", 30).unwrap();
    assert_eq!(
        directory.register("vfs", 31),
        Err(IpcError::AlreadyRegistered)
    );
}

#[test]
fn test_unregister() {
    let (world, _) = directory_world();
    let ctx = context(&world);
    let directory = ctx.directory();

    directory.register("vfs", 30).unwrap();
    directory.unregister("vfs").unwrap();
    assert_eq!(directory.lookup("vfs"), Err(IpcError::NotFound));
    assert_eq!(directory.unregister("vfs"), Err(IpcError::NotFound));
}

#[test]
fn test_register_and_unregister_announce_service() {
    let (world, _) = directory_world();
    let ctx = context(&world);
    let directory = ctx.directory();

    directory.register("vfs", 30).unwrap();
    directory.unregister("vfs").unwrap();

    let notices = world.broadcasts();
    assert_eq!(notices.len(), 2);
    assert!(notices
        .iter()
        .all(|n| n.message_id == msg::IPC_MSG_SERVICE_NOTICE));
    assert_eq!(notices[0].payload_str(), Some("SERVICE_REGISTER:vfs:30"));
    assert_eq!(notices[1].payload_str(), Some("SERVICE_UNREGISTER:vfs"));
}

#[test]
fn test_rejected_register_is_not_announced() {
    let (world, _) = directory_world();
    let ctx = context(&world);
    let directory = ctx.directory();

    directory.register("vfs", 30).unwrap();
    assert!(directory.register("vfs", 31).is_err());
    assert!(directory.unregister("blk").is_err());
    assert_eq!(world.broadcasts().len(), 1);
}

#[test]
fn test_register_succeeds_when_notice_fails() {
    let (world, table) = directory_world();
    world.fail_broadcasts(SendFault::Unavailable);
    let ctx = context(&world);

    assert_eq!(ctx.directory().register("vfs", 30), Ok(()));
    assert_eq!(table.lock().unwrap().get("vfs"), Some(&30));
    assert!(world.has_log_containing("notice failed"));
}

#[test]
fn test_lookup_without_answer_is_no_such_peer() {
    let (world, _) = directory_world();
    world.silence(99);
    let ctx = IpcContext::new(
        world.process(ME),
        IpcConfig::default().with_ledger_capacity(1),
    );
    // Occupy the only ledger slot so the lookup call goes untracked
    ctx.send(99, 1, b"", true).unwrap();

    let err = ctx.directory().lookup("vfs").unwrap_err();
    assert_eq!(err, IpcError::ServiceUnavailable);
    assert!(err.is_no_such_peer());
}

#[test]
fn test_empty_name_rejected_locally() {
    let (world, _) = directory_world();
    let ctx = context(&world);
    let directory = ctx.directory();

    assert_eq!(directory.lookup(""), Err(IpcError::InvalidParameter));
    assert_eq!(directory.register("", 30), Err(IpcError::InvalidParameter));
    assert_eq!(directory.unregister(""), Err(IpcError::InvalidParameter));
    assert_eq!(world.send_count(), 0);
}

#[test]
fn test_long_name_rejected_locally() {
    let (world, _) = directory_world();
    let ctx = context(&world);

    let name = "n".repeat(64);
    assert_eq!(ctx.directory().lookup(&name), Err(IpcError::InvalidParameter));
    assert_eq!(world.send_count(), 0);
}

#[test]
fn test_directory_unreachable_is_distinct_from_not_found() {
    let world = MockWorld::new();
    world.fail_sends_to(DIRECTORY, SendFault::Unavailable);
    let ctx = context(&world);

    let err = ctx.directory().lookup("vfs").unwrap_err();
    assert_eq!(err, IpcError::ServiceUnavailable);
    assert_ne!(err, IpcError::NotFound);
    assert!(err.is_no_such_peer());
}

#[test]
fn test_directory_silent_times_out() {
    let world = MockWorld::new();
    world.silence(DIRECTORY);
    let ctx = context(&world);

    assert_eq!(ctx.directory().lookup("vfs"), Err(IpcError::Timeout));
    assert_eq!(world.now_ms(), 1000);

    assert_eq!(ctx.directory().unregister("vfs"), Err(IpcError::Timeout));
    assert_eq!(world.now_ms(), 1500);
}

#[test]
fn test_malformed_response_is_protocol_error() {
    let world = MockWorld::new();
    world.reply_with(DIRECTORY, b"not json".to_vec());
    let ctx = context(&world);

    assert!(matches!(
        ctx.directory().lookup("vfs"),
        Err(IpcError::Protocol(_))
    ));
}

#[test]
fn test_custom_directory_pid() {
    let world = MockWorld::new();
    world.reply_with(
        5,
        serde_json::to_vec(&LookupResponse {
            status: STATUS_OK,
            pid: Some(77),
        })
        .unwrap(),
    );
    let ctx = IpcContext::new(
        world.process(ME),
        IpcConfig::default().with_directory_pid(5),
    );

    assert_eq!(ctx.directory().lookup("vfs"), Ok(77));
    assert!(world.sent_to(DIRECTORY).is_empty());
}
