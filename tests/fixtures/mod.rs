#![allow(dead_code)]

mod fixture_job;

pub use fixture_job::*;
