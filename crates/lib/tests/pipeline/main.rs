mod common;

mod build_tests;
mod cache_tests;
mod store_tests;
