//! Test utilities shared by provider and cache tests.
