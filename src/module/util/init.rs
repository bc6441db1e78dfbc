//! This module is responsible for preparing the resources needed by the application, such as directories and configurations.
//!

pub mod resource {
    use super::AppProperty;
    use crate::module::error::Result;

    /// Initialize the application resources and return an AppProperty instance containing paths and configurations.
    ///
    pub fn init(conf_dir: &str) -> Result<AppProperty> {
        // Load the app configuration file, generating the default one on first run
        let conf = crate::module::util::conf::toml::load(conf_dir)?;

        // Prepare every directory the services write into
        let paths = crate::module::util::path::dir::create_app_sub_dir(&conf)?;

        Ok(AppProperty { path: paths, conf })
    }
}

/// This struct represents the properties of the app, such as paths and configurations.
///
#[derive(Debug, Clone)]
pub struct AppProperty {
    pub path: crate::module::util::path::AppPath, // The paths of the app resources
    pub conf: crate::module::util::conf::Config,  // The configurations of the app
}
