mod common;
use common::run_pipeline;

#[test]
fn average() {
    run_pipeline(include_str!("testfiles/average.ks"));
}

#[test]
fn fib() {
    run_pipeline(include_str!("testfiles/fib.ks"));
}

#[test]
fn loops() {
    run_pipeline(include_str!("testfiles/loops.ks"));
}

#[test]
fn mandel() {
    run_pipeline(include_str!("testfiles/mandel.ks"));
}

#[test]
fn shadow() {
    run_pipeline(include_str!("testfiles/shadow.ks"));
}
