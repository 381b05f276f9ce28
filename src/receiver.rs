//! The receiver singleton (C2): one [`ReceiverHandle`] per address family,
//! created on first use and shared by every in-flight probe of that family.

pub(crate) mod actor;
mod registry;

pub use actor::{Delivery, ReceiverHandle};
pub use registry::CorrelationKey;

use std::collections::HashMap;
use std::sync::OnceLock;

use tokio::sync::Mutex;

use crate::channel::{RawChannel, Socket2Channel};
use crate::error::TraceError;
use crate::family::AddressFamily;

type Table = Mutex<HashMap<AddressFamily, ReceiverHandle>>;

fn table() -> &'static Table {
    static TABLE: OnceLock<Table> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get the running receiver for `family`, starting one over a real raw
/// socket if none is running yet. The table lock is held across socket
/// creation so two concurrent first callers can't each spawn their own
/// receiver for the same family.
pub async fn get_or_start(family: AddressFamily) -> Result<ReceiverHandle, TraceError> {
    let mut table = table().lock().await;
    if let Some(handle) = table.get(&family) {
        if !handle.is_closed() {
            return Ok(handle.clone());
        }
    }
    let channel = std::sync::Arc::new(Socket2Channel::open(family)?) as std::sync::Arc<dyn RawChannel>;
    let handle = ReceiverHandle::spawn(family, channel);
    table.insert(family, handle.clone());
    Ok(handle)
}

/// Drop every tracked receiver handle, letting its actor task drain and
/// close on its own once any in-flight registrations finish. Intended for
/// test isolation between cases that each expect a fresh receiver.
pub async fn reset_for_tests() {
    table().lock().await.clear();
}

/// Seed the singleton table with a handle directly, bypassing a real socket
/// open. Lets integration tests run probes and the orchestrator end-to-end
/// against a synthetic [`crate::channel::test_support::LoopbackChannel`]
/// instead of requiring `CAP_NET_RAW`.
pub async fn install_for_tests(family: AddressFamily, handle: ReceiverHandle) {
    table().lock().await.insert(family, handle);
}
