pub mod archive;
pub mod backup_config;
pub mod detect;
pub mod executor;
pub mod progress;
pub mod redacted;
pub mod result_error;
pub mod run;
pub mod validate;
pub mod vault;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
