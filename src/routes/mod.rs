pub mod availability_routes;
pub mod system_routes;
pub mod watchlist_routes;
