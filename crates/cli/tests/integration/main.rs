mod common;

mod build_tests;
mod gc_tests;
mod images_tests;
