pub mod availability_service;
pub mod notify_service;
pub mod provider;
pub mod registration;
pub mod watchlist_service;
