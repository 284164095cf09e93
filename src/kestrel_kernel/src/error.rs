//! Result codes and per-operation error types
use core::{fmt, mem::transmute};
use kestrel_portkit::FrameError;

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use kestrel_kernel::ResultCode;
            /// assert_eq!(ResultCode::BadObjectState.as_str(), "BadObjectState");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            /// Convert a raw value (e.g., one read back from a saved `a0`) to
            /// `ResultCode`.
            pub fn from_raw(raw: i8) -> Option<Self> {
                match raw {
                    $(
                        x if x == Self::$vname as i8 => Some(Self::$vname),
                    )*
                    _ => None,
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that a kernel operation or a
    /// system service can produce.
    ///
    /// The values are passed through the `a0` register by system services,
    /// sign-extended to the register width.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// The operation is not supported.
        NotSupported = -9,
        /// A parameter is invalid in a way that is no covered by any other error
        /// codes.
        BadParam = -17,
        /// The specified task identifier doesn't refer to a created task.
        BadId = -18,
        /// The current context disallows the operation.
        BadContext = -25,
        /// A stack region is too small to hold a context frame.
        NoMemory = -33,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// An operation or an object couldn't be enqueued because there are too
        /// many of such things that already have been enqueued.
        QueueOverflow = -43,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }

    /// Get the register representation of the code.
    #[inline]
    pub fn to_register(self) -> usize {
        self as i8 as isize as usize
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_id_error {}
    /// Error type for task lookups ([`State::task_state`] etc.).
    ///
    /// [`State::task_state`]: crate::State::task_state
    pub enum BadIdError {
        BadId,
    }
}

define_error! {
    mod bad_context_error {}
    /// Error type for [`lock_cpu`].
    ///
    /// [`lock_cpu`]: crate::klock::lock_cpu
    pub enum BadContextError {
        /// CPU Lock is already active.
        BadContext,
    }
}

define_error! {
    mod create_task_error {}
    /// Error type for [`State::create_task`].
    ///
    /// [`State::create_task`]: crate::State::create_task
    pub enum CreateTaskError {
        /// The priority is out of range, or the stack region is misaligned.
        BadParam,
        /// The stack region can't hold the initial frame.
        NoMemory,
        /// The task table is full.
        QueueOverflow,
    }
}

define_error! {
    mod activate_task_error {}
    /// Error type for [`State::activate`].
    ///
    /// [`State::activate`]: crate::State::activate
    pub enum ActivateTaskError: BadIdError {
        BadId,
        /// The task is already active (not in the Dormant state).
        QueueOverflow,
    }
}

define_error! {
    mod mark_ready_error {}
    /// Error type for [`State::mark_ready`].
    ///
    /// [`State::mark_ready`]: crate::State::mark_ready
    pub enum MarkReadyError: BadIdError {
        BadId,
        /// The task is neither Blocked nor Suspended.
        BadObjectState,
    }
}

define_error! {
    mod mark_blocked_error {}
    /// Error type for [`State::mark_blocked`].
    ///
    /// [`State::mark_blocked`]: crate::State::mark_blocked
    pub enum MarkBlockedError: BadIdError {
        BadId,
        /// The task is neither Running nor Ready.
        BadObjectState,
    }
}

define_error! {
    mod suspend_error {}
    /// Error type for [`State::suspend`] and [`State::resume`].
    ///
    /// [`State::suspend`]: crate::State::suspend
    /// [`State::resume`]: crate::State::resume
    pub enum SuspendError: BadIdError {
        BadId,
        /// The task is Dormant, or (for `resume`) not Suspended, or (for
        /// `suspend`) already Suspended.
        BadObjectState,
    }
}

define_error! {
    mod set_priority_error {}
    /// Error type for [`State::set_priority`].
    ///
    /// [`State::set_priority`]: crate::State::set_priority
    pub enum SetPriorityError: BadIdError {
        BadId,
        /// The priority is out of range.
        BadParam,
        /// The task is Dormant.
        BadObjectState,
    }
}

define_error! {
    mod switch_error {}
    /// Error type for [`State::switch`] and [`State::switch_from_saved`].
    ///
    /// [`State::switch`]: crate::State::switch
    /// [`State::switch_from_saved`]: crate::State::switch_from_saved
    pub enum SwitchError: BadIdError {
        BadId,
        /// `from` is not the current task.
        BadContext,
        /// `to` is not Ready, or its saved frame is corrupted.
        BadObjectState,
        /// The outgoing task's stack can't hold its frame.
        NoMemory,
    }
}

/// Error type for [`State::save_context`] and [`State::restore_context`].
///
/// [`State::save_context`]: crate::State::save_context
/// [`State::restore_context`]: crate::State::restore_context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    BadId,
    /// The frame codec rejected the frame.
    Frame(FrameError),
}

impl ContextError {
    /// The frame codec error, if any.
    #[inline]
    pub fn frame_error(self) -> Option<FrameError> {
        match self {
            Self::BadId => None,
            Self::Frame(e) => Some(e),
        }
    }
}

impl From<BadIdError> for ContextError {
    #[inline]
    fn from(_: BadIdError) -> Self {
        Self::BadId
    }
}

impl From<FrameError> for ContextError {
    #[inline]
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}
