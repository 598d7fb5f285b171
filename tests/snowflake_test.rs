//! Tests for the Snowflake session against a mocked REST endpoint.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

use drive_stage::error::Error;
use drive_stage::{
    PutOptions, Snowflake, StageLayout, TransformStatus, Transformer, WarehouseConfig,
    WarehouseSession,
};

fn config(server: &Server) -> WarehouseConfig {
    WarehouseConfig {
        user: "LOADER".to_string(),
        password: "secret".to_string(),
        account: "myorg-acct".to_string(),
        warehouse: "LOAD_WH".to_string(),
        database: "DOCS".to_string(),
        schema: "RAW".to_string(),
        role: Some("LOADER_ROLE".to_string()),
        host: Some(server.url()),
    }
}

async fn mock_login(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/session/v1/login-request")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("warehouse".into(), "LOAD_WH".into()),
            Matcher::UrlEncoded("databaseName".into(), "DOCS".into()),
            Matcher::UrlEncoded("schemaName".into(), "RAW".into()),
            Matcher::UrlEncoded("roleName".into(), "LOADER_ROLE".into()),
        ]))
        .match_body(Matcher::PartialJson(json!({
            "data": {
                "ACCOUNT_NAME": "myorg-acct",
                "LOGIN_NAME": "LOADER",
                "PASSWORD": "secret"
            }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "success": true,
                "code": null,
                "message": null,
                "data": {"token": "session-token", "masterToken": "master", "sessionId": 42}
            })
            .to_string(),
        )
        .create_async()
        .await
}

fn query_mock(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/queries/v1/query-request")
        .match_query(Matcher::Any)
        .match_header("authorization", "Snowflake Token=\"session-token\"")
}

mod login {
    use super::*;

    #[tokio::test]
    async fn test_login_and_logout() {
        let mut server = Server::new_async().await;
        let login = mock_login(&mut server).await;
        let logout = server
            .mock("POST", "/session")
            .match_query(Matcher::UrlEncoded("delete".into(), "true".into()))
            .match_header("authorization", "Snowflake Token=\"session-token\"")
            .with_status(200)
            .with_body(r#"{"success": true, "data": null}"#)
            .expect(1)
            .create_async()
            .await;

        let session = Snowflake::new(config(&server)).login().await.unwrap();
        session.close().await.unwrap();

        login.assert_async().await;
        logout.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_connection_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/session/v1/login-request")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": false,
                    "code": "390100",
                    "message": "Incorrect username or password was specified.",
                    "data": null
                })
                .to_string(),
            )
            .create_async()
            .await;

        let err = Snowflake::new(config(&server)).login().await.err().unwrap();

        assert!(matches!(err, Error::Connection(_)));
        assert!(err.to_string().contains("Incorrect username or password"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_error() {
        let server = Server::new_async().await;
        let mut config = config(&server);
        config.host = Some("http://127.0.0.1:1".to_string());

        let err = Snowflake::new(config).login().await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}

mod statements {
    use super::*;

    #[tokio::test]
    async fn test_call_binds_target_and_returns_first_value() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        let call = query_mock(&mut server)
            .match_body(Matcher::PartialJson(json!({
                "sqlText": "CALL DOCS.RAW.PROCESS_STAGED_FILES(?)",
                "bindings": {"1": {"type": "TEXT", "value": "DOCS.RAW"}}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "data": {
                        "queryId": "01b2",
                        "rowtype": [{"name": "PROCESS_STAGED_FILES", "type": "text"}],
                        "rowset": [["Transformation completed for DOCS.RAW"]]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut session = Snowflake::new(config(&server)).login().await.unwrap();
        let result = session
            .call("DOCS.RAW.PROCESS_STAGED_FILES", "DOCS.RAW")
            .await
            .unwrap();

        assert_eq!(result.as_deref(), Some("Transformation completed for DOCS.RAW"));
        call.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_statement_is_sql_error() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        query_mock(&mut server)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": false,
                    "code": "002003",
                    "message": "SQL compilation error: Table 'RAW_CSV_DATA' does not exist",
                    "data": {"sqlState": "42S02", "queryId": "01b3"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut session = Snowflake::new(config(&server)).login().await.unwrap();
        let err = session.execute("SELECT * FROM RAW_CSV_DATA").await.unwrap_err();

        match err {
            Error::Sql {
                code, sql_state, ..
            } => {
                assert_eq!(code, "002003");
                assert_eq!(sql_state, "42S02");
            }
            other => panic!("expected SQL error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_running_statement_is_polled() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        query_mock(&mut server)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "code": "333334",
                    "message": "Asynchronous execution in progress.",
                    "data": {"queryId": "01b4", "getResultUrl": "/queries/01b4/result"}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let result = server
            .mock("GET", "/queries/01b4/result")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "data": {
                        "queryId": "01b4",
                        "rowtype": [{"name": "status", "type": "text"}],
                        "rowset": [["Copy executed with 3 files processed."]]
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let mut session = Snowflake::new(config(&server)).login().await.unwrap();
        let rows = session.execute("COPY INTO T FROM @S").await.unwrap();

        assert_eq!(rows.query_id, "01b4");
        assert_eq!(rows.columns, vec!["status"]);
        assert_eq!(
            rows.rows,
            vec![vec![Some("Copy executed with 3 files processed.".to_string())]]
        );
        result.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_into_client_side_encrypted_stage_is_rejected() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        query_mock(&mut server)
            .match_body(Matcher::PartialJson(json!({
                "sqlText": "PUT 'file:///tmp/files/*' @DOCS.RAW.PDF_FILES_STAGE AUTO_COMPRESS=TRUE OVERWRITE=TRUE"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "data": {
                        "command": "UPLOAD",
                        "src_locations": ["/tmp/files/*"],
                        "encryptionMaterial": {
                            "queryStageMasterKey": "a2V5",
                            "queryId": "01b5",
                            "smkId": 1
                        },
                        "stageInfo": {
                            "locationType": "S3",
                            "location": "bucket/stage/",
                            "region": "us-west-2",
                            "isClientSideEncrypted": true,
                            "creds": {}
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut session = Snowflake::new(config(&server)).login().await.unwrap();
        let err = session
            .put("/tmp/files/*", "@DOCS.RAW.PDF_FILES_STAGE", PutOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedStage(_)));
    }
}

mod staging {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use sha2::{Digest, Sha256};

    const SAS: &str = "sv=2022-11-02&sig=abc";

    fn local_files() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Q1 #2.pdf"), b"%PDF-1.7").unwrap();
        std::fs::write(dir.path().join("b.csv"), b"id,name\n1,x\n").unwrap();
        let source = format!("{}/*", dir.path().display());
        (dir, source)
    }

    async fn mock_put_command(server: &mut ServerGuard, source: &str, overwrite: &str) -> Mock {
        query_mock(server)
            .match_body(Matcher::Regex(format!("OVERWRITE={}", overwrite)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "data": {
                        "command": "UPLOAD",
                        "src_locations": [source],
                        "encryptionMaterial": null,
                        "stageInfo": {
                            "locationType": "AZURE",
                            "location": "container/stages/42/",
                            "storageAccount": "sfcacct",
                            "isClientSideEncrypted": false,
                            "creds": {"AZURE_SAS_TOKEN": format!("?{}", SAS)}
                        }
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await
    }

    fn sas_query() -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("sv".into(), "2022-11-02".into()),
            Matcher::UrlEncoded("sig".into(), "abc".into()),
        ])
    }

    #[tokio::test]
    async fn test_put_uploads_every_file_into_the_stage() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        let (_dir, source) = local_files();
        mock_put_command(&mut server, &source, "TRUE").await;

        let digest = BASE64.encode(Sha256::digest(b"%PDF-1.7"));
        let pdf = server
            .mock("PUT", "/container/stages/42/Q1%20%232.pdf")
            .match_query(sas_query())
            .match_header("x-ms-blob-type", "BlockBlob")
            .match_header("x-ms-meta-sfcdigest", digest.as_str())
            .match_body("%PDF-1.7")
            .with_status(201)
            .expect(1)
            .create_async()
            .await;
        let csv = server
            .mock("PUT", "/container/stages/42/b.csv.gz")
            .match_query(sas_query())
            .match_header("content-type", "application/gzip")
            .match_header("x-ms-meta-sfcdigest", Matcher::Regex(".+".into()))
            .with_status(201)
            .expect(1)
            .create_async()
            .await;
        let head = server.mock("HEAD", Matcher::Any).expect(0).create_async().await;

        let config = config(&server);
        let mut session = Snowflake::new(config)
            .with_storage_url(server.url())
            .login()
            .await
            .unwrap();
        let summary = session
            .put(&source, "@DOCS.RAW.PDF_FILES_STAGE", PutOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.uploaded, vec!["Q1 #2.pdf", "b.csv.gz"]);
        assert!(summary.skipped.is_empty());
        pdf.assert_async().await;
        csv.assert_async().await;
        head.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_without_overwrite_skips_staged_files() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        let (_dir, source) = local_files();
        mock_put_command(&mut server, &source, "FALSE").await;

        server
            .mock("HEAD", "/container/stages/42/Q1%20%232.pdf")
            .match_query(sas_query())
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("HEAD", "/container/stages/42/b.csv.gz")
            .match_query(sas_query())
            .with_status(404)
            .create_async()
            .await;
        let pdf = server
            .mock("PUT", "/container/stages/42/Q1%20%232.pdf")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let csv = server
            .mock("PUT", "/container/stages/42/b.csv.gz")
            .match_query(sas_query())
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let options = PutOptions {
            auto_compress: true,
            overwrite: false,
        };
        let mut session = Snowflake::new(config(&server))
            .with_storage_url(server.url())
            .login()
            .await
            .unwrap();
        let summary = session
            .put(&source, "@DOCS.RAW.PDF_FILES_STAGE", options)
            .await
            .unwrap();

        assert_eq!(summary.uploaded, vec!["b.csv.gz"]);
        assert_eq!(summary.skipped, vec!["Q1 #2.pdf"]);
        pdf.assert_async().await;
        csv.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_upload_is_stage_error() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        let (_dir, source) = local_files();
        mock_put_command(&mut server, &source, "TRUE").await;
        server
            .mock("PUT", Matcher::Regex("^/container/stages/42/".into()))
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("AuthenticationFailed")
            .create_async()
            .await;

        let mut session = Snowflake::new(config(&server))
            .with_storage_url(server.url())
            .login()
            .await
            .unwrap();
        let err = session
            .put(&source, "@DOCS.RAW.PDF_FILES_STAGE", PutOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Stage(_)));
        assert!(err.to_string().contains("403"));
    }
}

mod transform_over_session {
    use super::*;

    #[tokio::test]
    async fn test_sql_failure_status() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        query_mock(&mut server)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": false,
                    "code": "100038",
                    "message": "Numeric value 'abc' is not recognized",
                    "data": {"sqlState": "22018"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let config = config(&server);
        let destination = StageLayout::default().resolve(&config);
        let mut session = Snowflake::new(config).login().await.unwrap();
        let status = Transformer::new(destination).run(&mut session, "DOCS.RAW").await;

        assert!(matches!(status, TransformStatus::SqlFailure { .. }));
        assert!(status.to_string().contains("Numeric value 'abc' is not recognized"));
    }

    #[tokio::test]
    async fn test_transport_failure_status() {
        let mut server = Server::new_async().await;
        mock_login(&mut server).await;
        query_mock(&mut server)
            .with_status(503)
            .with_body("Service Unavailable")
            .create_async()
            .await;

        let config = config(&server);
        let destination = StageLayout::default().resolve(&config);
        let mut session = Snowflake::new(config).login().await.unwrap();
        let status = Transformer::new(destination).run(&mut session, "DOCS.RAW").await;

        assert!(matches!(status, TransformStatus::Unexpected { .. }));
        assert!(status.to_string().starts_with("Unexpected error during transformation:"));
    }
}
