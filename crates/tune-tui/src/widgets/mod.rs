pub mod toast;
pub mod text_input;
