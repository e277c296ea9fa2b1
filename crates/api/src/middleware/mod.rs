pub mod internal_token;
