// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 工厂模块
//!
//! `Factory` 是构造各类消息对象的统一入口，内部持有一份 [`Config`]，
//! 服务端请求的查询解析选项、默认协议版本以及上传文件的移动策略都取自其中。

use crate::{
    config::Config,
    environment::ServerParams,
    exception::Result,
    request::{Request, UriInput},
    response::Response,
    server_request::ServerRequest,
    stream::{Handle, Stream},
    uploaded_file::{UploadSource, UploadedFile},
    uri::Uri,
};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Factory {
    config: Config,
}

impl Factory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn create_request(&self, method: &str, uri: impl Into<UriInput>) -> Result<Request> {
        Request::new(method, uri)
    }

    /// `reason` 为空时使用标准原因短语
    pub fn create_response(&self, code: u16, reason: &str) -> Result<Response> {
        Response::with_reason(code, reason)
    }

    pub fn create_server_request(
        &self,
        method: &str,
        uri: impl Into<UriInput>,
        server_params: ServerParams,
    ) -> Result<ServerRequest> {
        ServerRequest::from_parts(
            method,
            uri,
            server_params,
            self.config.protocol_version(),
            &self.config.parse_options(),
        )
    }

    /// 以给定内容创建可读写的内存流，位置停在开头
    pub fn create_stream(&self, content: impl AsRef<[u8]>) -> Stream {
        Stream::from_string(content)
    }

    pub fn create_stream_from_file(&self, path: impl AsRef<Path>, mode: &str) -> Result<Stream> {
        Stream::from_path(path, mode)
    }

    pub fn create_stream_from_resource(&self, handle: Handle, mode: &str) -> Result<Stream> {
        Stream::from_handle(handle, mode)
    }

    /// 未给出大小时取流的大小
    pub fn create_uploaded_file(
        &self,
        stream: Stream,
        size: Option<u64>,
        error: i64,
        client_filename: Option<&str>,
        client_media_type: Option<&str>,
        client_full_path: Option<&str>,
    ) -> Result<UploadedFile> {
        let size = size.or_else(|| stream.get_size());
        UploadedFile::new(
            Some(UploadSource::Stream(stream)),
            size,
            error,
            client_filename,
            client_media_type,
            client_full_path,
        )
    }

    pub fn create_uri(&self, uri: &str) -> Result<Uri> {
        Uri::new(uri)
    }

    /// 按配置的移动策略与分块大小移动上传文件
    pub fn move_uploaded_file(&self, file: &UploadedFile, target: impl AsRef<Path>) -> Result<()> {
        let mover = self.config.file_mover();
        file.move_to_with(target, mover.as_ref(), self.config.upload_chunk_size())
    }
}
