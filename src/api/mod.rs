pub mod extract;
pub mod response;
pub mod routes;
pub mod state;

pub use extract::{Body, Params};
pub use response::{created, ok, ok_with_message, ApiResponse, ApiResult, Created};
pub use routes::create_router;
pub use state::AppState;
