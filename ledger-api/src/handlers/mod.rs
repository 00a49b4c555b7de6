mod app;
mod transactions;

pub use app::add_routes;
