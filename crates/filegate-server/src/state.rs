use std::collections::BTreeMap;
use std::sync::Arc;

use filegate_core::Manager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    /// Backend name -> the `<scheme>://...` spec it was registered with,
    /// echoed back by `GET /` (§6).
    pub backend_urls: Arc<BTreeMap<String, String>>,
}
