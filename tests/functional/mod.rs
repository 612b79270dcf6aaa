//! Functional tests


mod api_test;
mod auth_test;
mod pool_test;
