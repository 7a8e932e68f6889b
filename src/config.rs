use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

use crate::{
    param::{DEFAULT_PROTOCOL_VERSION, PROTOCOL_VERSIONS, UPLOAD_CHUNK_SIZE},
    query::ParseStrOptions,
    uploaded_file::{FileMover, RenameMover, UploadDirMover},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    convert_query_dots: bool,
    #[serde(default = "default_upload_chunk_size")]
    upload_chunk_size: usize,
    #[serde(default)]
    upload_dir: Option<String>,
    #[serde(default = "default_protocol_version")]
    protocol_version: String,
}

fn default_upload_chunk_size() -> usize {
    UPLOAD_CHUNK_SIZE // 1MB
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            convert_query_dots: false,
            upload_chunk_size: default_upload_chunk_size(),
            upload_dir: None,
            protocol_version: default_protocol_version(),
        }
    }

    /// 从 TOML 文件加载配置。文件无法读取或解析时记录错误并使用默认配置
    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => {
                error!("无法打开配置文件{}：{}，使用默认配置", filename, e);
                return Config::new();
            }
        };
        let mut str_val = String::new();
        if let Err(e) = file.read_to_string(&mut str_val) {
            error!("读取配置文件{}失败：{}，使用默认配置", filename, e);
            return Config::new();
        }
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(str_val: &str) -> Self {
        let mut raw_config: Config = match toml::from_str(str_val) {
            Ok(t) => t,
            Err(_) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置");
                Config::new()
            }
        };
        if raw_config.upload_chunk_size == 0 {
            warn!("upload_chunk_size被设置为0，该值将被改为{}。", UPLOAD_CHUNK_SIZE);
            raw_config.upload_chunk_size = UPLOAD_CHUNK_SIZE;
        }
        if !PROTOCOL_VERSIONS.contains(&raw_config.protocol_version.as_str()) {
            warn!(
                "不支持的protocol_version：{}，该值将被改为{}。",
                raw_config.protocol_version, DEFAULT_PROTOCOL_VERSION
            );
            raw_config.protocol_version = default_protocol_version();
        }
        raw_config
    }
}

impl Config {
    pub fn convert_query_dots(&self) -> bool {
        self.convert_query_dots
    }

    pub fn upload_chunk_size(&self) -> usize {
        self.upload_chunk_size
    }

    pub fn upload_dir(&self) -> Option<&str> {
        self.upload_dir.as_deref()
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// 解析查询字符串与表单时使用的选项
    pub fn parse_options(&self) -> ParseStrOptions {
        ParseStrOptions {
            convert_dots_spaces: self.convert_query_dots,
        }
    }

    /// 配置了上传目录时只移动该目录下的文件，否则直接重命名
    pub fn file_mover(&self) -> Box<dyn FileMover> {
        match &self.upload_dir {
            Some(dir) => Box::new(UploadDirMover::new(dir)),
            None => Box::new(RenameMover),
        }
    }
}
