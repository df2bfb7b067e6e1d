//! Shared fixtures for bridge integration tests.

pub mod mock_gateway;
