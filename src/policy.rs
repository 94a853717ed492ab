//! Write-policy combinators (spec §4.5).
//!
//! Each writable resource declares one of these policies. A combinator reads
//! the incoming bytes, trims whitespace, parses, validates, updates the
//! cache, and optionally pushes the value through to the kernel via the
//! passthrough handler. This is the "dispatch table replacing near-duplicate
//! handlers" redesign from spec §9: instead of dozens of near-identical
//! handler types, every writable resource is one of these six combinators
//! configured by data.

use crate::cache::ContainerCache;
use crate::descriptor::EmulatedResource;
use rand::Rng;
use std::thread;
use std::time::Duration;

#[derive(Debug, Fail)]
pub enum PolicyError {
    #[fail(display = "value {:?} out of range [{}, {}]", _0, _1, _2)]
    OutOfRange(String, i64, i64),

    #[fail(display = "value {:?} is not a valid integer", _0)]
    NotAnInteger(String),

    #[fail(display = "value {:?} is not one of the allowed values", _0)]
    NotAllowed(String),

    #[fail(display = "kernel write-through failed: {}", _0)]
    KernelWrite(#[cause] crate::agent::AgentError),
}

impl PolicyError {
    pub fn errno(&self) -> libc::c_int {
        match self {
            PolicyError::OutOfRange(..) | PolicyError::NotAnInteger(_) | PolicyError::NotAllowed(_) => {
                libc::EINVAL
            }
            PolicyError::KernelWrite(e) => e.errno(),
        }
    }
}

/// A push-through callback: given the bytes to write, performs the kernel
/// write via passthrough and, for the max-/min-wins policies, can also read
/// the kernel's current value back. Kept as a trait object rather than a
/// concrete passthrough dependency so [policy] can be unit-tested without a
/// real or fake agent.
pub trait KernelWriteThrough {
    fn write(&self, bytes: &[u8]) -> Result<(), crate::agent::AgentError>;
    fn read(&self) -> Result<Vec<u8>, crate::agent::AgentError>;
}

/// The six write policies of spec §4.5.
pub enum WritePolicy {
    Int { min: i64, max: i64, push: bool },
    Bool { push: bool },
    Enum { allowed: Vec<String>, push: bool },
    MaxInt { push: bool },
    MinInt { push: bool },
    Str { push: bool },
}

impl WritePolicy {
    pub fn int(min: i64, max: i64, push: bool) -> Self {
        WritePolicy::Int { min, max, push }
    }

    pub fn bool_(push: bool) -> Self {
        WritePolicy::Bool { push }
    }

    pub fn enum_(allowed: impl IntoIterator<Item = impl Into<String>>, push: bool) -> Self {
        WritePolicy::Enum {
            allowed: allowed.into_iter().map(Into::into).collect(),
            push,
        }
    }

    pub fn max_int(push: bool) -> Self {
        WritePolicy::MaxInt { push }
    }

    pub fn min_int(push: bool) -> Self {
        WritePolicy::MinInt { push }
    }

    pub fn str_(push: bool) -> Self {
        WritePolicy::Str { push }
    }

    /// Applies this policy to an incoming write. `descriptor` supplies the
    /// per-resource lock serializing the read-compare-write sequence (§4.5);
    /// `cache` is the container's cache for `path`; `kernel` performs the
    /// actual push-through when the policy calls for it and `ignore_errors`
    /// is not set.
    pub fn apply(
        &self,
        descriptor: &EmulatedResource,
        path: &str,
        cache: &ContainerCache,
        kernel: &dyn KernelWriteThrough,
        input: &[u8],
        retries: u32,
        ignore_errors: bool,
    ) -> Result<(), PolicyError> {
        let trimmed = String::from_utf8_lossy(input).trim().to_string();

        match self {
            WritePolicy::Int { min, max, push } => {
                let value = parse_int(&trimmed)?;
                if value < *min || value > *max {
                    return Err(PolicyError::OutOfRange(trimmed, *min, *max));
                }
                let _guard = descriptor.lock.lock().unwrap();
                if *push {
                    push_or_ignore(kernel, trimmed.as_bytes(), ignore_errors)?;
                }
                cache.update(path, format!("{}\n", value).into_bytes());
                Ok(())
            }
            WritePolicy::Bool { push } => {
                WritePolicy::int(0, 1, *push).apply(
                    descriptor, path, cache, kernel, input, retries, ignore_errors,
                )
            }
            WritePolicy::Enum { allowed, push } => {
                if !allowed.iter().any(|a| a == &trimmed) {
                    return Err(PolicyError::NotAllowed(trimmed));
                }
                let _guard = descriptor.lock.lock().unwrap();
                if *push {
                    push_or_ignore(kernel, trimmed.as_bytes(), ignore_errors)?;
                }
                cache.update(path, format!("{}\n", trimmed).into_bytes());
                Ok(())
            }
            WritePolicy::MaxInt { push } => {
                let value = parse_int(&trimmed)?;
                self.max_min_wins(descriptor, path, cache, kernel, value, retries, ignore_errors, true)
            }
            WritePolicy::MinInt { .. } => {
                let value = parse_int(&trimmed)?;
                self.max_min_wins(descriptor, path, cache, kernel, value, retries, ignore_errors, false)
            }
            WritePolicy::Str { push } => {
                let _guard = descriptor.lock.lock().unwrap();
                if cache.peek(path).as_deref() == Some(format!("{}\n", trimmed).as_bytes()) {
                    return Ok(());
                }
                if *push {
                    push_or_ignore(kernel, trimmed.as_bytes(), ignore_errors)?;
                }
                cache.update(path, format!("{}\n", trimmed).into_bytes());
                Ok(())
            }
        }
    }

    /// Shared implementation of `writeMaxInt`/`writeMinInt`: if pushing,
    /// reads the kernel's current value, writes only if the new value
    /// improves on it (is strictly greater for max, strictly lesser for
    /// min), and retries up to `retries` times with a small random backoff
    /// if a concurrent writer raced us, per spec §4.5. The cache is updated
    /// unconditionally with the value this instance observed/wrote.
    fn max_min_wins(
        &self,
        descriptor: &EmulatedResource,
        path: &str,
        cache: &ContainerCache,
        kernel: &dyn KernelWriteThrough,
        value: i64,
        retries: u32,
        ignore_errors: bool,
        is_max: bool,
    ) -> Result<(), PolicyError> {
        let push = matches!(
            (self, is_max),
            (WritePolicy::MaxInt { push: true }, true) | (WritePolicy::MinInt { push: true }, false)
        );

        let _guard = descriptor.lock.lock().unwrap();

        if !push {
            cache.update(path, format!("{}\n", value).into_bytes());
            return Ok(());
        }

        let mut attempt = 0;
        let final_value = loop {
            let current = read_kernel_int(kernel)?;
            let wins = if is_max { value > current } else { value < current };

            if !wins {
                break current;
            }

            match kernel.write(format!("{}\n", value).as_bytes().to_vec().as_slice()) {
                Ok(()) => break value,
                Err(e) if attempt < retries => {
                    attempt += 1;
                    let jitter = rand::thread_rng().gen_range(0..100);
                    thread::sleep(Duration::from_micros(jitter));
                    let _ = e;
                    continue;
                }
                Err(e) => {
                    if ignore_errors {
                        break current;
                    }
                    return Err(PolicyError::KernelWrite(e));
                }
            }
        };

        cache.update(path, format!("{}\n", final_value).into_bytes());
        Ok(())
    }
}

fn push_or_ignore(
    kernel: &dyn KernelWriteThrough,
    bytes: &[u8],
    ignore_errors: bool,
) -> Result<(), PolicyError> {
    match kernel.write(bytes) {
        Ok(()) => Ok(()),
        Err(e) if ignore_errors => {
            warn!("ignoring kernel write-through failure: {}", e);
            Ok(())
        }
        Err(e) => Err(PolicyError::KernelWrite(e)),
    }
}

fn read_kernel_int(kernel: &dyn KernelWriteThrough) -> Result<i64, PolicyError> {
    let bytes = kernel.read().map_err(PolicyError::KernelWrite)?;
    parse_int(String::from_utf8_lossy(&bytes).trim())
}

fn parse_int(s: &str) -> Result<i64, PolicyError> {
    s.parse::<i64>().map_err(|_| PolicyError::NotAnInteger(s.to_string()))
}
