#![cfg(feature = "gpu")]

use fluid_canvas::viewer::FailureLatch;

#[test]
fn test_repeated_failure_reported_once() {
    let mut latch = FailureLatch::default();
    assert!(!latch.observe(false));
    assert!(latch.observe(true), "first failure starts an outage");
    for _ in 0..100 {
        assert!(!latch.observe(true), "ongoing outage must stay quiet");
    }
    assert!(latch.is_failing());

    assert!(!latch.observe(false));
    assert!(!latch.is_failing());
    assert!(latch.observe(true), "failure after recovery is reported again");
}
