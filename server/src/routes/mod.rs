mod app_router;
pub mod inbox;

pub use app_router::AppRouter;
