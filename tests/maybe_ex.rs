//! Tests for the fault-channel `MaybeEx` engine.

#![cfg(feature = "fault-channel")]

mod common;

use common::{pause, DropCounter, ReleaseOrder};
use monad_flow::{Continuation, Fault, Maybe, MaybeEx, MaybeResult, Reader, UsageError};

// ============================================================================
// Steps
// ============================================================================

const INPUTS: [Option<&str>; 5] = [None, Some(" 7 , 3"), Some("100"), Some("11,14"), Some("8,a")];
const EXPECTED: [Option<i32>; 5] = [None, Some(10), None, Some(25), None];

fn validate(s: Option<&'static str>) -> MaybeEx<&'static str> {
    match s {
        Some(s) if !s.trim().is_empty() && s.contains(',') => MaybeEx::value(s),
        _ => MaybeEx::nothing(),
    }
}

fn try_parse(s: &str) -> MaybeEx<i32> {
    MaybeEx::from_option(s.parse().ok())
}

async fn split(input: Option<&'static str>, delayed: bool) -> Result<(String, String), Fault> {
    pause(delayed, 10).await;
    let s = validate(input).await?;
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return MaybeEx::nothing().await;
    }
    Ok((parts[0].trim().to_string(), parts[1].trim().to_string()))
}

async fn sum(input: Option<&'static str>, delayed: bool, counter: DropCounter) -> Result<i32, Fault> {
    let _guard = counter.guard();
    pause(delayed, 10).await;
    let (a, b) = MaybeEx::new(split(input, delayed)).await?;
    let a = try_parse(&a).await?;
    let b = try_parse(&b).await?;
    Ok(a + b)
}

fn run_grid(delayed: bool) {
    let mut actual = Vec::new();
    for input in INPUTS {
        let counter = DropCounter::new();
        let result = MaybeEx::new(sum(input, delayed, counter.clone())).wait().unwrap();
        actual.push(result.into_option());
        assert_eq!(counter.count(), 1, "input {:?} released its guard once", input);
    }
    assert_eq!(actual, EXPECTED);
}

// ============================================================================
// Input grid
// ============================================================================

#[test]
fn test_input_grid_sync() {
    run_grid(false);
}

#[test]
fn test_input_grid_delayed() {
    run_grid(true);
}

// ============================================================================
// Release
// ============================================================================

async fn nested(order: ReleaseOrder, delayed: bool) -> Result<i32, Fault> {
    let _outer = order.mark("outer");
    let middle = MaybeEx::new({
        let order = order.clone();
        async move {
            let _middle = order.mark("middle");
            let inner = MaybeEx::new({
                let order = order.clone();
                async move {
                    let _inner = order.mark("inner");
                    pause(delayed, 10).await;
                    MaybeEx::<i32>::nothing().await
                }
            });
            Ok(inner.await? + 1)
        }
    });
    Ok(middle.await? + 1)
}

#[test]
fn test_abort_releases_innermost_first() {
    for delayed in [false, true] {
        let order = ReleaseOrder::new();
        let result = MaybeEx::new(nested(order.clone(), delayed)).wait().unwrap();
        assert_eq!(result, MaybeResult::Nothing);
        assert_eq!(order.labels(), vec!["inner", "middle", "outer"]);
    }
}

#[test]
fn test_user_fault_is_not_an_abort() {
    let counter = DropCounter::new();
    let guard = counter.guard();
    let maybe = MaybeEx::<i32>::new(async move {
        let _guard = guard;
        pause(true, 10).await;
        let parsed: i32 = "x".parse()?;
        Ok(parsed)
    });

    let fault = maybe.wait().unwrap_err();
    assert!(fault.is::<std::num::ParseIntError>());
    assert!(!fault.is_break());
    assert_eq!(counter.count(), 1);
}

// ============================================================================
// Mixing engines
// ============================================================================

#[test]
fn test_sentinel_forwarded_into_maybe_aborts_it() {
    let counter = DropCounter::new();
    let guard = counter.guard();
    let maybe = Maybe::new(async move {
        let _guard = guard;
        let half = MaybeEx::<i32>::nothing().await?;
        Ok(half * 2)
    });
    assert_eq!(maybe.wait().unwrap(), MaybeResult::Nothing);
    assert_eq!(counter.count(), 1);
}

#[test]
fn test_aborted_maybe_inside_maybe_ex_is_nothing() {
    let counter = DropCounter::new();
    let guard = counter.guard();
    let maybe = MaybeEx::new(async move {
        let _guard = guard;
        let n = Maybe::<i32>::nothing().await?;
        Ok(n + 1)
    });
    assert_eq!(maybe.wait().unwrap(), MaybeResult::Nothing);
    assert_eq!(counter.count(), 1);
}

struct Env;

#[test]
fn test_sentinel_forwarded_into_reader_is_not_exposed() {
    let reader = Reader::<Env, i32>::new(async { MaybeEx::<i32>::nothing().await })
        .apply(Env)
        .unwrap();
    match reader.wait() {
        Err(fault) => {
            assert!(!fault.is_break());
            assert_eq!(fault.usage(), Some(&UsageError::Nothing));
        }
        other => panic!("Expected usage fault, got {:?}", other),
    }
}

// ============================================================================
// Continuation protocol
// ============================================================================

#[test]
fn test_second_continuation_is_usage_error() {
    let maybe = MaybeEx::new(async {
        pause(true, 10).await;
        Ok(1)
    });
    maybe.on_completed(Continuation::noop()).unwrap();
    assert_eq!(
        maybe.on_completed(Continuation::noop()),
        Err(UsageError::ContinuationAlreadyRegistered)
    );
}
