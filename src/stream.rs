// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 流模块
//!
//! `Stream` 包装唯一的底层资源（文件或内存缓冲区），并提供带位置、大小、
//! 定位语义的读写接口。
//!
//! ## 资源模型
//! - `Stream` 是一个可廉价克隆的句柄，内部通过 `Arc<Mutex<...>>` 持有状态，
//!   克隆出的句柄指向同一个底层资源（与消息对象的写时复制配合使用）。
//! - 资源一旦被 `close()`/`detach()`，所有 I/O 操作都返回 "detached" 错误。
//! - 跨线程使用时由互斥锁保证同一时刻只有一个调用者访问底层资源。

use crate::exception::{Exception, Result};
use log::{debug, error, warn};
use serde_json::{Map, Value};
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

/// 流所包装的原始资源
#[derive(Debug)]
pub enum Handle {
    /// 文件系统中的文件
    File(File),
    /// 内存缓冲区
    Memory(Cursor<Vec<u8>>),
}

impl Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Handle::File(f) => f.read(buf),
            Handle::Memory(c) => c.read(buf),
        }
    }
}

impl Write for Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Handle::File(f) => f.write(buf),
            Handle::Memory(c) => c.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Handle::File(f) => f.flush(),
            Handle::Memory(c) => c.flush(),
        }
    }
}

impl Seek for Handle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Handle::File(f) => f.seek(pos),
            Handle::Memory(c) => c.seek(pos),
        }
    }
}

impl Handle {
    fn current_size(&self) -> io::Result<u64> {
        match self {
            Handle::File(f) => Ok(f.metadata()?.len()),
            Handle::Memory(c) => Ok(c.get_ref().len() as u64),
        }
    }
}

/// 构造流的输入形式
#[derive(Debug)]
pub enum StreamSource {
    /// 新建空的内存缓冲区
    Empty,
    /// 已打开的资源及其打开模式
    Handle(Handle, String),
    /// 按给定模式打开的文件路径
    Path(PathBuf, String),
    /// 写入内存缓冲区并回绕的原始内容
    Content(Vec<u8>),
}

/// 打开模式解析结果：(OpenOptions, 可读, 可写)
fn parse_mode(mode: &str) -> Result<(OpenOptions, bool, bool)> {
    let flags: String = mode.chars().filter(|c| !matches!(c, 'b' | 't' | 'e')).collect();
    let plus = flags.ends_with('+');
    let base = flags.trim_end_matches('+');
    let mut options = OpenOptions::new();
    let (readable, writable) = match base {
        "r" => {
            options.read(true).write(plus);
            (true, plus)
        }
        "w" => {
            options.write(true).create(true).truncate(true).read(plus);
            (plus, true)
        }
        "a" => {
            options.append(true).create(true).read(plus);
            (plus, true)
        }
        "x" => {
            options.write(true).create_new(true).read(plus);
            (plus, true)
        }
        "c" => {
            options.write(true).create(true).read(plus);
            (plus, true)
        }
        _ => return Err(Exception::invalid(format!("Invalid stream mode: {}", mode))),
    };
    Ok((options, readable, writable))
}

#[derive(Debug)]
struct StreamState {
    handle: Option<Handle>,
    size: Option<u64>,
    uri: Option<String>,
    mode: String,
    readable: bool,
    writable: bool,
    seekable: bool,
    custom_metadata: Map<String, Value>,
}

impl StreamState {
    fn new(handle: Handle, mode: &str, readable: bool, writable: bool, uri: Option<String>) -> Self {
        Self {
            handle: Some(handle),
            size: None,
            uri,
            mode: mode.to_string(),
            readable,
            writable,
            seekable: true,
            custom_metadata: Map::new(),
        }
    }

    fn handle(&mut self) -> Result<&mut Handle> {
        self.handle
            .as_mut()
            .ok_or_else(|| Exception::runtime("Stream is detached"))
    }

    fn size(&mut self) -> Option<u64> {
        if self.size.is_some() {
            return self.size;
        }
        let handle = self.handle.as_ref()?;
        self.size = handle.current_size().ok();
        self.size
    }
}

/// 可读写、可定位的字节流句柄。
#[derive(Debug, Clone)]
pub struct Stream {
    state: Arc<Mutex<StreamState>>,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    fn from_state(state: StreamState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// 新建一个空的、可读写的内存流
    pub fn new() -> Self {
        Self::from_state(StreamState::new(
            Handle::Memory(Cursor::new(Vec::new())),
            "w+b",
            true,
            true,
            None,
        ))
    }

    /// 以给定内容构造内存流，位置处于开头
    pub fn from_string(content: impl AsRef<[u8]>) -> Self {
        Self::from_state(StreamState::new(
            Handle::Memory(Cursor::new(content.as_ref().to_vec())),
            "w+b",
            true,
            true,
            None,
        ))
    }

    /// 按 fopen 风格的模式（`r`、`r+`、`w`、`a+` 等）打开文件
    ///
    /// # 错误处理
    /// 文件无法打开时返回 `Runtime`，消息中包含路径、模式以及系统错误信息。
    pub fn from_path(path: impl AsRef<Path>, mode: &str) -> Result<Self> {
        let path = path.as_ref();
        let (options, readable, writable) = parse_mode(mode)?;
        let file = match options.open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("无法以模式{}打开文件{}：{}", mode, path.display(), e);
                return Err(Exception::runtime(format!(
                    "The file {} cannot be opened (mode {}): {}",
                    path.display(),
                    mode,
                    e
                )));
            }
        };
        debug!("以模式{}打开文件{}", mode, path.display());
        Ok(Self::from_state(StreamState::new(
            Handle::File(file),
            mode,
            readable,
            writable,
            Some(path.display().to_string()),
        )))
    }

    /// 包装一个已打开的资源，`mode` 描述该资源的读写能力
    pub fn from_handle(handle: Handle, mode: &str) -> Result<Self> {
        let (_, readable, writable) = parse_mode(mode)?;
        Ok(Self::from_state(StreamState::new(
            handle, mode, readable, writable, None,
        )))
    }

    pub fn from_source(source: StreamSource) -> Result<Self> {
        match source {
            StreamSource::Empty => Ok(Self::new()),
            StreamSource::Handle(handle, mode) => Self::from_handle(handle, &mode),
            StreamSource::Path(path, mode) => Self::from_path(path, &mode),
            StreamSource::Content(bytes) => Ok(Self::from_string(bytes)),
        }
    }

    /// 两个句柄是否指向同一个流
    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("流的状态锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }
}

// --- I/O 操作 ---

impl Stream {
    /// 从当前位置读取最多 `length` 个字节
    pub fn read(&self, length: usize) -> Result<Vec<u8>> {
        let mut state = self.lock();
        if state.handle.is_none() {
            return Err(Exception::runtime("Stream is detached"));
        }
        if !state.readable {
            return Err(Exception::runtime("Cannot read from non-readable stream"));
        }
        if length == 0 {
            return Ok(Vec::new());
        }
        let handle = state.handle()?;
        let mut buffer = Vec::with_capacity(length.min(64 * 1024));
        Read::by_ref(handle)
            .take(length as u64)
            .read_to_end(&mut buffer)
            .map_err(|e| Exception::runtime(format!("Unable to read from stream: {}", e)))?;
        Ok(buffer)
    }

    /// 在当前位置写入数据，返回写入的字节数
    pub fn write(&self, data: impl AsRef<[u8]>) -> Result<usize> {
        let data = data.as_ref();
        let mut state = self.lock();
        if state.handle.is_none() {
            return Err(Exception::runtime("Stream is detached"));
        }
        if !state.writable {
            return Err(Exception::runtime("Cannot write to a non-writable stream"));
        }
        // 大小缓存失效
        state.size = None;
        let handle = state.handle()?;
        handle
            .write_all(data)
            .map_err(|e| Exception::runtime(format!("Unable to write to stream: {}", e)))?;
        Ok(data.len())
    }

    pub fn seek(&self, pos: SeekFrom) -> Result<()> {
        let mut state = self.lock();
        if state.handle.is_none() {
            return Err(Exception::runtime("Stream is detached"));
        }
        if !state.seekable {
            return Err(Exception::runtime("Stream is not seekable"));
        }
        let (offset, whence) = match pos {
            SeekFrom::Start(n) => (n as i64, "SEEK_SET"),
            SeekFrom::Current(n) => (n, "SEEK_CUR"),
            SeekFrom::End(n) => (n, "SEEK_END"),
        };
        let handle = state.handle()?;
        if let Err(e) = handle.seek(pos) {
            return Err(Exception::runtime(format!(
                "Unable to seek to stream position {} with whence {}: {}",
                offset, whence, e
            )));
        }
        Ok(())
    }

    pub fn rewind(&self) -> Result<()> {
        self.seek(SeekFrom::Start(0))
    }

    /// 当前读写位置
    pub fn tell(&self) -> Result<u64> {
        let mut state = self.lock();
        let handle = state.handle()?;
        handle
            .stream_position()
            .map_err(|e| Exception::runtime(format!("Unable to determine stream position: {}", e)))
    }

    /// 位置是否已到达流的末尾
    pub fn eof(&self) -> Result<bool> {
        let mut state = self.lock();
        let handle = state.handle()?;
        let position = handle.stream_position()?;
        let size = handle.current_size()?;
        Ok(position >= size)
    }

    /// 流的字节大小。已知时使用缓存；流已分离时为 `None`
    pub fn get_size(&self) -> Option<u64> {
        self.lock().size()
    }

    /// 从当前位置读取剩余的全部内容
    pub fn get_contents(&self) -> Result<Vec<u8>> {
        let mut state = self.lock();
        if state.handle.is_none() {
            return Err(Exception::runtime("Stream is detached"));
        }
        if !state.readable {
            return Err(Exception::runtime("Stream is not readable"));
        }
        let handle = state.handle()?;
        let mut contents = Vec::new();
        handle
            .read_to_end(&mut contents)
            .map_err(|e| Exception::runtime(format!("Unable to read stream contents: {}", e)))?;
        Ok(contents)
    }

    /// 关闭流并释放底层资源。可重复调用
    pub fn close(&self) {
        if let Some(handle) = self.detach() {
            drop(handle);
        }
    }

    /// 分离底层资源并返回；之后流处于不可用状态。可重复调用
    pub fn detach(&self) -> Option<Handle> {
        let mut state = self.lock();
        let handle = state.handle.take();
        state.size = None;
        state.uri = None;
        state.readable = false;
        state.writable = false;
        state.seekable = false;
        handle
    }

    pub fn is_readable(&self) -> bool {
        self.lock().readable
    }

    pub fn is_writable(&self) -> bool {
        self.lock().writable
    }

    pub fn is_seekable(&self) -> bool {
        self.lock().seekable
    }

    /// 资源标识（文件路径）；内存流与已分离的流为 `None`
    pub fn uri(&self) -> Option<String> {
        self.lock().uri.clone()
    }
}

// --- 元数据 ---

impl Stream {
    /// 自定义元数据覆盖在资源自身的元数据之上。流已分离时返回空表
    pub fn metadata(&self) -> Map<String, Value> {
        let mut state = self.lock();
        let mut meta = Map::new();
        let (wrapper, stream_type) = match state.handle.as_ref() {
            Some(Handle::File(_)) => ("plainfile", "STDIO"),
            Some(Handle::Memory(_)) => ("memory", "MEMORY"),
            None => return Map::new(),
        };
        let eof = match state.handle.as_mut() {
            Some(handle) => match (handle.stream_position(), handle.current_size()) {
                (Ok(pos), Ok(size)) => pos >= size,
                _ => false,
            },
            None => true,
        };
        meta.insert("timed_out".to_string(), Value::Bool(false));
        meta.insert("blocked".to_string(), Value::Bool(true));
        meta.insert("eof".to_string(), Value::Bool(eof));
        meta.insert("wrapper_type".to_string(), Value::from(wrapper));
        meta.insert("stream_type".to_string(), Value::from(stream_type));
        meta.insert("mode".to_string(), Value::from(state.mode.clone()));
        meta.insert("unread_bytes".to_string(), Value::from(0));
        meta.insert("seekable".to_string(), Value::Bool(state.seekable));
        if let Some(uri) = &state.uri {
            meta.insert("uri".to_string(), Value::from(uri.clone()));
        }
        for (k, v) in &state.custom_metadata {
            meta.insert(k.clone(), v.clone());
        }
        meta
    }

    /// 查询单个元数据项
    pub fn metadata_value(&self, key: &str) -> Option<Value> {
        self.metadata().remove(key)
    }

    /// 设置自定义元数据项
    pub fn set_custom_metadata(&self, key: &str, value: Value) {
        self.lock().custom_metadata.insert(key.to_string(), value);
    }
}

impl fmt::Display for Stream {
    /// 可定位时先回到开头，然后输出全部内容；出错时输出空串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_seekable() && self.rewind().is_err() {
            return Ok(());
        }
        match self.get_contents() {
            Ok(bytes) => write!(f, "{}", String::from_utf8_lossy(&bytes)),
            Err(_) => Ok(()),
        }
    }
}
