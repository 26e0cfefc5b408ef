//! Argument and return capabilities of wrapped host functions.
//!
//! Every trait here is implemented for tuples and `Fn` signatures up to
//! twelve parameters by the macros at the bottom of the file.

use std::ffi::c_int;
use std::fmt::Display;

use crate::stack::{Push, Receive, Stack};

/// An argument list read from consecutive stack slots.
pub trait FromStack: Sized {
    /// Number of slots the list occupies.
    const COUNT: c_int;

    /// Read the list from slots `first..first + COUNT`.
    ///
    /// On a kind mismatch returns the script-facing error message.
    fn from_stack(stack: Stack, first: c_int) -> Result<Self, String>;
}

/// Values pushed as separate arguments of a call.
pub trait PushMany {
    fn count(&self) -> usize;

    fn push_many(&self, stack: Stack);
}

/// Return type of a wrapped function.
///
/// `()` returns nothing, any [`Push`] type returns one value, and
/// `Result<T, E>` returns `T` or raises `E` as a script error.
pub trait IntoReturn {
    /// Push the results and return their count, or the error message.
    fn into_return(self, stack: Stack) -> Result<c_int, String>;
}

impl IntoReturn for () {
    fn into_return(self, _stack: Stack) -> Result<c_int, String> {
        Ok(0)
    }
}

impl<T: Push> IntoReturn for T {
    fn into_return(self, stack: Stack) -> Result<c_int, String> {
        stack.push_checked(&self);
        Ok(1)
    }
}

impl<T: IntoReturn, E: Display> IntoReturn for Result<T, E> {
    fn into_return(self, stack: Stack) -> Result<c_int, String> {
        match self {
            Ok(value) => value.into_return(stack),
            Err(err) => Err(err.to_string()),
        }
    }
}

/// A host callable exposed to scripts: `Fn(A1, .., An) -> R`.
///
/// Plain functions need `R: IntoReturn`; constructors return the host
/// type itself.
pub trait HostFunction<Args>: 'static {
    type Output;

    fn invoke(&self, args: Args) -> Self::Output;
}

/// A host method: `Fn(&mut T, A1, .., An) -> R`.
pub trait HostMethod<T, Args>: 'static {
    type Output: IntoReturn;

    fn invoke(&self, this: &mut T, args: Args) -> Self::Output;
}

impl<T: Push> PushMany for Vec<T> {
    fn count(&self) -> usize {
        self.len()
    }

    fn push_many(&self, stack: Stack) {
        self.as_slice().push_many(stack);
    }
}

impl<T: Push> PushMany for &[T] {
    fn count(&self) -> usize {
        self.len()
    }

    fn push_many(&self, stack: Stack) {
        for value in self.iter() {
            stack.push(value);
        }
    }
}

fn bad_argument<T: Receive>(stack: Stack, pos: c_int, index: usize) -> String {
    format!(
        "bad argument #{}: expected {}, got {}",
        index,
        T::KINDS,
        stack.kind(pos)
    )
}

macro_rules! count {
    () => { 0 };
    ($head:ident $($tail:ident)*) => { 1 + count!($($tail)*) };
}

macro_rules! impl_arity {
    ($($arg:ident),*) => {
        impl<$($arg: Receive),*> FromStack for ($($arg,)*) {
            const COUNT: c_int = count!($($arg)*);

            #[allow(unused_variables, unused_mut, unused_assignments, non_snake_case)]
            fn from_stack(stack: Stack, first: c_int) -> Result<Self, String> {
                let mut pos = first;
                let mut index = 1usize;
                $(
                    let $arg = match stack.receive::<$arg>(pos) {
                        Some(value) => value,
                        None => return Err(bad_argument::<$arg>(stack, pos, index)),
                    };
                    pos += 1;
                    index += 1;
                )*
                Ok(($($arg,)*))
            }
        }

        impl<$($arg: Push),*> PushMany for ($($arg,)*) {
            fn count(&self) -> usize {
                count!($($arg)*)
            }

            #[allow(unused_variables, non_snake_case)]
            fn push_many(&self, stack: Stack) {
                let ($($arg,)*) = self;
                $(stack.push($arg);)*
            }
        }

        impl<Func, Ret, $($arg),*> HostFunction<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
        {
            type Output = Ret;

            #[allow(non_snake_case)]
            fn invoke(&self, args: ($($arg,)*)) -> Ret {
                let ($($arg,)*) = args;
                self($($arg),*)
            }
        }

        impl<Func, Ret, This, $($arg),*> HostMethod<This, ($($arg,)*)> for Func
        where
            Func: Fn(&mut This, $($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
        {
            type Output = Ret;

            #[allow(non_snake_case)]
            fn invoke(&self, this: &mut This, args: ($($arg,)*)) -> Ret {
                let ($($arg,)*) = args;
                self(this, $($arg),*)
            }
        }
    };
}

impl_arity!();
impl_arity!(A1);
impl_arity!(A1, A2);
impl_arity!(A1, A2, A3);
impl_arity!(A1, A2, A3, A4);
impl_arity!(A1, A2, A3, A4, A5);
impl_arity!(A1, A2, A3, A4, A5, A6);
impl_arity!(A1, A2, A3, A4, A5, A6, A7);
impl_arity!(A1, A2, A3, A4, A5, A6, A7, A8);
impl_arity!(A1, A2, A3, A4, A5, A6, A7, A8, A9);
impl_arity!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);
impl_arity!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11);
impl_arity!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12);
