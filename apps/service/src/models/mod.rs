pub mod check;

pub use check::{
    Assertion, AssertionSource, Check, CheckType, Comparison, HeaderValues, IpVersion,
    JitterStrategy, RetrySettings, RetryStrategy, TimeValue, UnitType,
};
