use jobspace::error::ErrorKind;
use jobspace::resources::{Capacity, ResourceAccountant};
use rstest::*;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

fn mib(n: u64) -> Capacity {
    Capacity::from_mib(n)
}

#[rstest]
#[case(100, 40, true)]
#[case(100, 100, true)]
#[case(100, 101, false)]
#[case(0, 1, false)]
fn test_reserve_against_ceiling(
    #[case] ceiling: u64,
    #[case] requested: u64,
    #[case] granted: bool,
) {
    let accountant = ResourceAccountant::new(mib(ceiling));
    match accountant.reserve(mib(requested)) {
        Ok(reservation) => {
            assert!(granted);
            assert_eq!(reservation.granted(), mib(requested));
            assert_eq!(accountant.remaining(), mib(ceiling - requested));
            reservation.release();
            assert_eq!(accountant.remaining(), mib(ceiling));
        }
        Err(e) => {
            assert!(!granted);
            assert_eq!(e.kind(), ErrorKind::ResourceExhausted);
            assert_eq!(accountant.remaining(), mib(ceiling));
        }
    }
}

#[test]
fn test_concurrent_jobs_never_exceed_ceiling() {
    let accountant = ResourceAccountant::new(Capacity::from_str("64M").unwrap());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let accountant = Arc::clone(&accountant);
            thread::spawn(move || {
                let mut granted = 0;
                for _ in 0..200 {
                    if let Ok(reservation) = accountant.reserve(mib(8)) {
                        assert!(accountant.reserved() <= accountant.ceiling());
                        granted += 1;
                        drop(reservation);
                    }
                }
                granted
            })
        })
        .collect();

    let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(total > 0);
    assert_eq!(accountant.reserved(), Capacity::ZERO);
    assert_eq!(accountant.remaining(), accountant.ceiling());
}

#[test]
fn test_held_reservations_block_others() {
    let accountant = ResourceAccountant::new(mib(10));
    let first = accountant.reserve(mib(6)).unwrap();
    let err = accountant.reserve(mib(6)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    let partial = accountant.reserve_within(mib(2), mib(6)).unwrap();
    assert_eq!(partial.granted(), mib(4));
    assert_eq!(accountant.remaining(), Capacity::ZERO);

    drop(first);
    partial.release();
    partial.release();
    assert_eq!(accountant.remaining(), mib(10));
}
