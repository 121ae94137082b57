pub mod audit_event;

pub use audit_event::{
    AuditEvent, EventType, ObjectReference, Verb, RESPONSE_STATUS_SUCCESS,
    STAGE_RESPONSE_COMPLETE, SYSTEM_WATCHER_USER,
};
