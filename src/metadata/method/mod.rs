//! Method bodies: headers, exception clauses and the attribute flags describing them.
//!
//! # Key Components
//!
//! - [`MethodBody`] - Parsed tiny/fat header plus exception clauses
//! - [`ExceptionHandler`] - One try/handler clause
//! - [`encode_fat_header`], [`write_exception_section`] - Emission of rewritten bodies
//! - [`MethodModifiers`], [`MethodBodyFlags`], [`SectionFlags`] - Flag sets

mod body;
mod exceptions;
mod types;

pub use body::{
    encode_fat_header, write_exception_section, MethodBody, FAT_HEADER_SIZE, TINY_MAX_STACK,
};
pub use exceptions::{
    ExceptionHandler, ExceptionHandlerFlags, FAT_CLAUSE_SIZE, SECTION_HEADER_SIZE,
    SMALL_CLAUSE_SIZE,
};
pub use types::{
    MethodBodyFlags, MethodModifiers, SectionFlags, METHOD_ACCESS_MASK, METHOD_VTABLE_LAYOUT_MASK,
};
