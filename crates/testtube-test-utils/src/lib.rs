// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Test utilities shared by the crates in this workspace.

/// A result type useful in tests, that wraps any error implementation.
pub type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Alias of [`anyhow::Result`], for tests that prefer context-carrying errors.
pub type AnyhowResult<T = ()> = anyhow::Result<T>;

/// Creates a module containing one `#[test]` per named case, each calling the test function with
/// the given arguments.
///
/// # Example
///
/// ```ignore
/// param_test! {
///     adds_up: [
///         small: (1, 2, 3),
///         large: (100, 200, 300),
///     ]
/// }
/// fn adds_up(lhs: u32, rhs: u32, expected: u32) {
///     assert_eq!(lhs + rhs, expected);
/// }
/// ```
#[macro_export]
macro_rules! param_test {
    ($func_name:ident -> $return_ty:ty: [
        $( $(#[$outer:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+ $(,)?
    ]) => {
        mod $func_name {
            use super::*;

            $(
                #[test]
                $(#[$outer])*
                fn $case_name() -> $return_ty {
                    $func_name($($args),*)
                }
            )*
        }
    };
    ($func_name:ident: [
        $( $(#[$outer:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+ $(,)?
    ]) => {
        $crate::param_test!(
            $func_name -> (): [ $( $(#[$outer])* $case_name: ( $($args),* ) ),* ]
        );
    };
}

/// Like [`param_test!`] but for `async` test functions, which are run with `#[tokio::test]`.
///
/// Attributes placed before the function name are forwarded to every generated case, which allows
/// passing arguments to the tokio test attribute, for example `#[tokio::test(start_paused = true)]`
/// through `async_param_test! { #[tokio::test(start_paused = true)] name -> (): [...] }`.
#[macro_export]
macro_rules! async_param_test {
    (@case [$(#[$attr:meta])+] $func_name:ident $return_ty:ty;
        $(#[$outer:meta])* $case_name:ident ( $($args:expr),* )
    ) => {
        $(#[$attr])+
        $(#[$outer])*
        async fn $case_name() -> $return_ty {
            $func_name($($args),*).await
        }
    };
    (@cases $attrs:tt $func_name:ident $return_ty:ty;
        $( [$(#[$outer:meta])*] $case_name:ident ( $($args:expr),* ) )*
    ) => {
        $(
            $crate::async_param_test!(
                @case $attrs $func_name $return_ty; $(#[$outer])* $case_name ( $($args),* )
            );
        )*
    };
    ($(#[$attr:meta])+ $func_name:ident -> $return_ty:ty: [
        $( $(#[$outer:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+ $(,)?
    ]) => {
        mod $func_name {
            use super::*;

            $crate::async_param_test!(
                @cases [$(#[$attr])+] $func_name $return_ty;
                $( [$(#[$outer])*] $case_name ( $($args),* ) )*
            );
        }
    };
    ($func_name:ident -> $return_ty:ty: [
        $( $(#[$outer:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+ $(,)?
    ]) => {
        $crate::async_param_test!(
            #[tokio::test] $func_name -> $return_ty: [
                $( $(#[$outer])* $case_name: ( $($args),* ) ),*
            ]
        );
    };
    ($func_name:ident: [
        $( $(#[$outer:meta])* $case_name:ident: ( $($args:expr),* $(,)? ) ),+ $(,)?
    ]) => {
        $crate::async_param_test!(
            #[tokio::test] $func_name -> (): [
                $( $(#[$outer])* $case_name: ( $($args),* ) ),*
            ]
        );
    };
}

#[cfg(test)]
mod tests {
    param_test! {
        doubles: [
            zero: (0, 0),
            one: (1, 2),
        ]
    }
    fn doubles(input: u32, expected: u32) {
        assert_eq!(input * 2, expected);
    }

    async_param_test! {
        doubles_async -> super::super::Result: [
            three: (3, 6),
        ]
    }
    async fn doubles_async(input: u32, expected: u32) -> super::Result {
        tokio::task::yield_now().await;
        assert_eq!(input * 2, expected);
        Ok(())
    }
}
