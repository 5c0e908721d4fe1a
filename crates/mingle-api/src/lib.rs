pub mod messages;
pub mod middleware;

use std::sync::Arc;

use mingle_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
}
