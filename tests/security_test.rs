// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

#[cfg(test)]
mod security_tests {
    //! # 注入与越权回归测试
    //!
    //! 验证消息模型在构造阶段就拒绝常见的攻击载荷，而不是把它们带进序列化结果：
    //! - 标头与原因短语中的 CRLF 注入 (Response Splitting)
    //! - 文件名中的路径穿越与空字节 (Path Traversal / Null Byte)
    //! - 重复 Host 与非法方法 (Request Smuggling)
    //! - 上传目录之外的文件移动

    use http_message::{
        environment::ServerParams, Factory, HttpMessage, HttpRequest, Request, Response,
        ServerRequest, Stream, UploadedFile, Uri,
    };
    use std::fs;
    use tempfile::tempdir;

    /// ## 攻击向量：标头 CRLF 注入
    #[test]
    fn test_header_crlf_injection_rejected() {
        let response = Response::default();
        let payloads = [
            "value\r\nSet-Cookie: stolen=1",
            "value\nX-Injected: 1",
            "value\rX-Injected: 1",
            "\0",
        ];
        for payload in payloads {
            let err = response.with_header("X-Test", payload).unwrap_err();
            assert!(err.is_invalid_argument(), "payload {:?} accepted", payload);
            assert!(response.with_added_header("X-Test", payload).is_err());
        }
        assert!(response.with_header("X-Bad\r\nName", "v").is_err());
        assert!(response.with_header("", "v").is_err());
        assert!(response.with_header("X-Empty", Vec::<String>::new()).is_err());
    }

    /// ## 攻击向量：原因短语注入
    #[test]
    fn test_reason_phrase_injection_rejected() {
        assert!(Response::with_reason(200, "OK\r\n\r\n<script>").is_err());
        assert!(Response::default().with_status(302, "Found\nLocation: //evil").is_err());
    }

    /// ## 攻击向量：重复 Host（请求走私）
    #[test]
    fn test_duplicate_host_rejected() {
        let request = Request::new("GET", "/").unwrap();
        let err = request
            .with_header("Host", "a.com")
            .unwrap()
            .with_added_header("Host", "b.com")
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(request.with_header("Host", vec!["a.com", "b.com"]).is_err());
        assert!(request.with_header("Host", vec!["a.com", "a.com"]).is_ok());
    }

    /// ## 攻击向量：非法方法与请求目标
    #[test]
    fn test_method_and_target_injection_rejected() {
        assert!(Request::new("GET /admin HTTP/1.1\r\n", "/").is_err());
        let request = Request::new("GET", "/").unwrap();
        assert!(request.with_method("DELETE\r\n").is_err());
        assert!(request.with_request_target("/ HTTP/1.1\r\nHost: evil").is_err());
    }

    /// ## 攻击向量：URI 中的控制字符与非法端口
    #[test]
    fn test_uri_components_encoded_or_rejected() {
        let uri = Uri::new("http://example.com/").unwrap();
        let injected = uri.with_path("/a b\r\nc").unwrap();
        assert_eq!(injected.path(), "/a%20b%0D%0Ac");
        assert!(uri.with_host("evil.com\r\n").is_err());
        assert!(uri.with_port(70000).is_err());
        assert!(uri.with_scheme("java script").is_err());
    }

    /// ## 攻击向量：上传文件名中的路径穿越与空字节
    #[test]
    fn test_upload_filename_traversal_rejected() {
        let factory = Factory::new();
        for name in ["../../etc/passwd", "a\0.png", "evil\r\n.png", "/abs.png"] {
            let result = factory.create_uploaded_file(Stream::new(), None, 0, Some(name), None, None);
            assert!(result.unwrap_err().is_invalid_argument(), "{:?} accepted", name);
        }
        assert!(factory
            .create_uploaded_file(Stream::new(), None, 0, None, Some("text/html\r\nX: 1"), None)
            .is_err());
    }

    /// ## 攻击向量：移动上传目录之外的文件
    #[test]
    fn test_move_outside_upload_dir_rejected() {
        let uploads = tempdir().unwrap();
        let secrets = tempdir().unwrap();
        let secret = secrets.path().join("shadow");
        fs::write(&secret, "root:x").unwrap();

        let file = UploadedFile::new(Some(secret.as_path().into()), None, 0, None, None, None).unwrap();
        let config = http_message::Config::from_toml_str(&format!(
            "upload_dir = \"{}\"",
            uploads.path().display()
        ));
        let err = Factory::with_config(config)
            .move_uploaded_file(&file, uploads.path().join("leaked"))
            .unwrap_err();
        assert!(err.is_runtime());
        assert!(secret.exists());
        assert!(!file.is_moved());
    }

    /// ## 攻击向量：伪造的服务器参数
    #[test]
    fn test_malicious_server_params_skipped() {
        let params: ServerParams = [
            ("HTTP_X_FORWARDED_FOR".to_string(), "1.1.1.1\r\nX-Admin: 1".to_string()),
            ("HTTP_USER_AGENT".to_string(), "curl/8.0".to_string()),
        ]
        .into();
        let request = ServerRequest::new("GET", "/", params).unwrap();
        assert!(!request.has_header("X-Forwarded-For"));
        assert!(!request.has_header("X-Admin"));
        assert_eq!(request.header_line("User-Agent"), "curl/8.0");
    }

    /// ## 协议健壮性：非法状态码与协议版本
    #[test]
    fn test_protocol_robustness() {
        for code in [0u16, 99, 600, 999, u16::MAX] {
            assert!(Response::new(code).is_err(), "status {} accepted", code);
        }
        assert!(Response::default().with_protocol_version("1.1\r\n").is_err());
        assert!(Request::new("GET", "/").unwrap().with_protocol_version("4").is_err());
        assert_eq!(Request::new("GET", "/").unwrap().uri().path(), "/");
    }
}
