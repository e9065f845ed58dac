//! Runtime library ABI
//!
//! The generated program calls into a runtime of documented symbol names.
//! Floating-point parameters always cross this boundary at 64-bit width.

// Console I/O
pub const PRINT_INT: &str = "print_int";
pub const PRINT_LONG: &str = "print_long";
pub const PRINT_DOUBLE: &str = "print_double";
pub const PRINT_STR: &str = "print_str";
pub const PRINT_TAB: &str = "print_tab";
pub const PRINT_NEWLINE: &str = "print_newline";
pub const INPUT_INT: &str = "input_int";
pub const INPUT_LONG: &str = "input_long";
pub const INPUT_DOUBLE: &str = "input_double";
pub const INPUT_STRING: &str = "input_string";

// DATA pool reads; the pool, its cursor and its length are globals emitted
// into the data section.
pub const READ_DATA_INT: &str = "read_data_int";
pub const READ_DATA_LONG: &str = "read_data_long";
pub const READ_DATA_DOUBLE: &str = "read_data_double";
pub const READ_DATA_STRING: &str = "read_data_string";

// Reference-counted strings
pub const STRING_FROM_LITERAL: &str = "string_from_literal";
pub const STRING_RETAIN: &str = "string_retain";
pub const STRING_RELEASE: &str = "string_release";
pub const STRING_CONCAT: &str = "string_concat";
pub const STRING_COMPARE: &str = "string_compare";
pub const STRING_LENGTH: &str = "string_length";
pub const STRING_MID: &str = "string_mid";
pub const STRING_LEFT: &str = "string_left";
pub const STRING_RIGHT: &str = "string_right";
pub const STRING_CHR: &str = "string_chr";
pub const STRING_ASC: &str = "string_asc";
pub const STRING_FROM_INT: &str = "string_from_int";
pub const STRING_FROM_DOUBLE: &str = "string_from_double";
pub const STRING_VAL: &str = "string_val";

// Array descriptors
pub const ARRAY_NEW: &str = "array_new";
pub const ARRAY_GET_ADDRESS: &str = "array_get_address";
pub const ARRAY_GET_ADDRESS_2D: &str = "array_get_address2";
pub const ARRAY_REDIM: &str = "array_redim";
pub const ARRAY_ERASE: &str = "array_erase";

// Math
pub const MATH_ABS_INT: &str = "abs_int";
pub const MATH_FABS: &str = "fabs";
pub const MATH_SGN_INT: &str = "sgn_int";
pub const MATH_SGN_DOUBLE: &str = "sgn_double";
pub const MATH_FLOOR: &str = "floor";
pub const MATH_POW: &str = "pow";
pub const MATH_FMOD: &str = "fmod";
pub const MATH_SQRT: &str = "sqrt";
pub const MATH_SIN: &str = "sin";
pub const MATH_COS: &str = "cos";
pub const MATH_TAN: &str = "tan";
pub const MATH_ATN: &str = "atan";
pub const MATH_LOG: &str = "log";
pub const MATH_EXP: &str = "exp";
pub const MATH_RND: &str = "rnd";

// Program termination and runtime errors; each error routine terminates
// the generated program.
pub const BASIC_END: &str = "basic_end";
pub const BASIC_ERROR: &str = "basic_error";

/// Error codes passed to `basic_error`.
pub const ERR_RETURN_WITHOUT_GOSUB: u32 = 3;
pub const ERR_OUT_OF_DATA: u32 = 4;
pub const ERR_UNHANDLED_THROW: u32 = 5;

// Globals emitted into the data section for the GOSUB/RETURN protocol and
// the DATA pool cursor.
pub const GOSUB_STACK: &str = "gosub_return_stack";
pub const GOSUB_SP: &str = "gosub_return_sp";
pub const ERR_CODE: &str = "err_code";
pub const DATA_POOL: &str = "data_pool";
pub const DATA_PTR: &str = "data_ptr";
pub const DATA_COUNT: &str = "data_count";
