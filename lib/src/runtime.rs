//! Names and descriptors of the Java-side runtime support classes.
//!
//! The callback object is a plain Java class shipped alongside the
//! annotations jar; the core only ever references it by name from
//! generated bytecode.

/// Internal name of the injection callback class.
pub const CALLBACK: &str = "classweave/InjectionCallback";

/// Field descriptor of the callback class.
pub const CALLBACK_DESC: &str = "Lclassweave/InjectionCallback;";

/// `(cancellable)` constructor.
pub const CALLBACK_INIT_BOOL: &str = "(Z)V";

/// `(cancellable, returnValue)` constructor.
pub const CALLBACK_INIT_BOOL_OBJECT: &str = "(ZLjava/lang/Object;)V";

pub const CALLBACK_IS_CANCELLED: &str = "isCancelled";
pub const CALLBACK_IS_CANCELLED_DESC: &str = "()Z";

pub const CALLBACK_GET_RETURN_VALUE: &str = "getReturnValue";
pub const CALLBACK_GET_RETURN_VALUE_DESC: &str = "()Ljava/lang/Object;";
