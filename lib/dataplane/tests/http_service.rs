// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

#[path = "common/ports.rs"]
mod ports;

#[path = "common/models.rs"]
mod models;

pub mod http_test {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use kserve_dataplane::http::service::HttpService;
    use kserve_dataplane::model_repository::ModelLoader;
    use kserve_dataplane::predictor::{PredictorClient, PredictorProxyModel};
    use kserve_dataplane::protocols::infer_type::{BINARY_DATA_OUTPUT, INFERENCE_HEADER_CONTENT_LENGTH};
    use kserve_dataplane::protocols::{
        DataType, FlattenTensor, InferRequest, InferResponse, InferTensor, ParameterValue,
    };
    use kserve_dataplane::{DataPlane, Model, ModelHandle, ModelRepository, Result};
    use kserve_runtime::{CancellationToken, PredictorProtocol};
    use reqwest::StatusCode;
    use rstest::*;
    use serde_json::{Value, json};

    use crate::models::{BrokenModel, EchoModel, FailingModel};
    use crate::ports::get_random_port;

    struct RunningService {
        token: CancellationToken,
        base_url: String,
        port: u16,
    }

    impl Drop for RunningService {
        fn drop(&mut self) {
            self.token.cancel();
        }
    }

    async fn wait_for_http_ready(port: u16, timeout_secs: u64) {
        let client = reqwest::Client::new();
        let start = tokio::time::Instant::now();
        let timeout = Duration::from_secs(timeout_secs);
        let url = format!("http://127.0.0.1:{}/v2/health/live", port);

        loop {
            match client.get(&url).send().await {
                Ok(_) => return,
                Err(_) if start.elapsed() < timeout => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => panic!("HTTP service failed to start within timeout: {}", e),
            }
        }
    }

    async fn start(dataplane: DataPlane) -> RunningService {
        let port = get_random_port().await;
        let service = HttpService::builder()
            .host("127.0.0.1")
            .port(port)
            .dataplane(Arc::new(dataplane))
            .build()
            .unwrap();
        let token = CancellationToken::new();
        tokio::spawn({
            let t = token.clone();
            async move { service.run(t).await }
        });
        wait_for_http_ready(port, 5).await;
        RunningService {
            token,
            base_url: format!("http://127.0.0.1:{port}"),
            port,
        }
    }

    async fn start_with(models: Vec<Arc<dyn Model>>) -> RunningService {
        let repository = Arc::new(ModelRepository::new(None));
        for model in models {
            repository.update(model);
        }
        start(DataPlane::new(repository)).await
    }

    #[fixture]
    fn models() -> Vec<Arc<dyn Model>> {
        vec![
            EchoModel::new("echo", true) as Arc<dyn Model>,
            Arc::new(FailingModel),
            Arc::new(BrokenModel),
        ]
    }

    fn int32_request(binary: bool) -> InferRequest {
        let mut input = InferTensor::new("x", vec![2, 2], DataType::Int32);
        input.set_data(FlattenTensor::Int32(vec![1, 2, 3, 4]), binary).unwrap();
        let mut request = InferRequest::new("echo", vec![input]);
        request.id = "req-1".to_string();
        request
    }

    async fn error_of(response: reqwest::Response) -> String {
        let body: Value = response.json().await.unwrap();
        body["error"].as_str().unwrap().to_string()
    }

    #[rstest]
    #[tokio::test]
    async fn test_v1_health_and_listing(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let client = reqwest::Client::new();

        let root: Value = client.get(format!("{}/", server.base_url)).send().await.unwrap().json().await.unwrap();
        assert_eq!(root, json!({"status": "alive"}));

        let listing: Value = client
            .get(format!("{}/v1/models", server.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listing, json!({"models": ["broken", "echo", "failing"]}));

        let ready = client.get(format!("{}/v1/models/echo", server.base_url)).send().await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
        assert_eq!(ready.json::<Value>().await.unwrap(), json!({"name": "echo", "ready": true}));

        let not_ready = client.get(format!("{}/v1/models/broken", server.base_url)).send().await.unwrap();
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);

        let missing = client.get(format!("{}/v1/models/missing", server.base_url)).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_of(missing).await, "Model with name missing does not exist.");
    }

    #[rstest]
    #[tokio::test]
    async fn test_v1_predict_and_explain(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let client = reqwest::Client::new();

        let predict: Value = client
            .post(format!("{}/v1/models/echo:predict", server.base_url))
            .json(&json!({"instances": [[1, 2], [3, 4]]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(predict, json!({"predictions": [[1, 2], [3, 4]]}));

        let explain: Value = client
            .post(format!("{}/v1/models/echo:explain", server.base_url))
            .json(&json!({"instances": [1]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(explain, json!({"explanations": {"instances": [1]}}));

        let unknown_verb = client
            .post(format!("{}/v1/models/echo:train", server.base_url))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown_verb.status(), StatusCode::NOT_FOUND);
    }

    #[rstest]
    #[case("echo", r#"{"instances": "abc"}"#, StatusCode::BAD_REQUEST, "Expected \"instances\" to be a list")]
    #[case("echo", "{not json", StatusCode::BAD_REQUEST, "Unrecognized request format")]
    #[case("missing", r#"{"instances": []}"#, StatusCode::NOT_FOUND, "Model with name missing does not exist.")]
    #[case("failing", r#"{"instances": []}"#, StatusCode::INTERNAL_SERVER_ERROR, "model exploded")]
    #[case("broken", r#"{"instances": []}"#, StatusCode::SERVICE_UNAVAILABLE, "Model with name broken is not ready.")]
    #[tokio::test]
    async fn test_v1_predict_errors(
        models: Vec<Arc<dyn Model>>,
        #[case] model: &str,
        #[case] body: &'static str,
        #[case] status: StatusCode,
        #[case] message: &str,
    ) {
        let server = start_with(models).await;
        let response = reqwest::Client::new()
            .post(format!("{}/v1/models/{model}:predict", server.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), status);
        assert!(error_of(response).await.starts_with(message));
    }

    #[rstest]
    #[tokio::test]
    async fn test_v2_metadata(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let client = reqwest::Client::new();

        let metadata: Value = client.get(format!("{}/v2", server.base_url)).send().await.unwrap().json().await.unwrap();
        assert_eq!(metadata["name"], "kserve-dataplane");
        assert_eq!(metadata["extensions"], json!(["model_repository_extension"]));

        let model: Value = client
            .get(format!("{}/v2/models/echo", server.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(model["name"], "echo");
        assert_eq!(model["inputs"], json!([]));
    }

    #[tokio::test]
    async fn test_v2_ready_without_predictor() {
        let predictor =
            PredictorClient::new("127.0.0.1:1", PredictorProtocol::RestV2, false, Duration::from_secs(5)).unwrap();
        let dataplane =
            DataPlane::new(Arc::new(ModelRepository::new(None))).with_predictor_health(Arc::new(predictor));
        let server = start(dataplane).await;

        let ready = reqwest::get(format!("{}/v2/health/ready", server.base_url)).await.unwrap();
        assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_of(ready).await, "Server is not ready");
    }

    #[tokio::test]
    async fn test_v2_health() {
        let lazy = EchoModel::new("lazy", false);
        let server = start_with(vec![lazy.clone() as Arc<dyn Model>]).await;
        let client = reqwest::Client::new();

        let live = client.get(format!("{}/v2/health/live", server.base_url)).send().await.unwrap();
        assert_eq!(live.status(), StatusCode::OK);
        assert_eq!(live.json::<Value>().await.unwrap(), json!({"live": true}));

        let ready = client.get(format!("{}/v2/health/ready", server.base_url)).send().await.unwrap();
        assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ready.json::<Value>().await.unwrap(), json!({"ready": false}));

        let model_ready = client.get(format!("{}/v2/models/lazy/ready", server.base_url)).send().await.unwrap();
        assert_eq!(model_ready.status(), StatusCode::SERVICE_UNAVAILABLE);

        // First inference loads the model
        let infer = client
            .post(format!("{}/v2/models/lazy/infer", server.base_url))
            .body(int32_request(false).to_rest().unwrap().0)
            .send()
            .await
            .unwrap();
        assert_eq!(infer.status(), StatusCode::OK);

        let ready = client.get(format!("{}/v2/health/ready", server.base_url)).send().await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
        let model_ready = client.get(format!("{}/v2/models/lazy/ready", server.base_url)).send().await.unwrap();
        assert_eq!(model_ready.json::<Value>().await.unwrap(), json!({"name": "lazy", "ready": true}));
    }

    #[rstest]
    #[tokio::test]
    async fn test_v2_infer_json(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let response = reqwest::Client::new()
            .post(format!("{}/v2/models/echo/infer", server.base_url))
            .json(&json!({
                "id": "abc",
                "inputs": [
                    {"name": "x", "shape": [2], "datatype": "INT32", "data": [1, 2]},
                    {"name": "s", "shape": [1], "datatype": "BYTES", "data": ["hello"]}
                ]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(INFERENCE_HEADER_CONTENT_LENGTH).is_none());

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["id"], "abc");
        assert_eq!(body["model_name"], "echo");
        assert_eq!(body["outputs"][0]["data"], json!([1, 2]));
        assert_eq!(body["outputs"][1]["data"], json!(["hello"]));
    }

    #[rstest]
    #[tokio::test]
    async fn test_v2_infer_fp16_json_rejected(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let response = reqwest::Client::new()
            .post(format!("{}/v2/models/echo/infer", server.base_url))
            .json(&json!({
                "inputs": [{"name": "h", "shape": [1], "datatype": "FP16", "data": [1.0]}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[rstest]
    #[tokio::test]
    async fn test_v2_infer_binary(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let mut request = int32_request(true);
        request.use_binary_outputs = true;
        let (body, json_length) = request.to_rest().unwrap();
        let json_length = json_length.unwrap();

        let response = reqwest::Client::new()
            .post(format!("{}/v2/models/echo/infer", server.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(INFERENCE_HEADER_CONTENT_LENGTH, json_length)
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[reqwest::header::CONTENT_TYPE], "application/octet-stream");
        let response_length: usize = response.headers()[INFERENCE_HEADER_CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();

        let bytes: Bytes = response.bytes().await.unwrap();
        assert_eq!(bytes.len(), response_length + 16);
        let decoded = InferResponse::from_bytes(&bytes, Some(response_length)).unwrap();
        assert_eq!(decoded.id, "req-1");
        assert_eq!(decoded.outputs[0].as_tensor().unwrap(), FlattenTensor::Int32(vec![1, 2, 3, 4]));

        let header: Value = serde_json::from_slice(&bytes[..response_length]).unwrap();
        assert_eq!(header["outputs"][0]["parameters"]["binary_data_size"], 16);
        assert!(header["outputs"][0].get("data").is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn test_v2_infer_binary_without_header(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let (body, _) = int32_request(true).to_rest().unwrap();
        let response = reqwest::Client::new()
            .post(format!("{}/v2/models/echo/infer", server.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[rstest]
    #[tokio::test]
    async fn test_binary_cloudevent(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let response = reqwest::Client::new()
            .post(format!("{}/v1/models/echo:predict", server.base_url))
            .header("ce-specversion", "1.0")
            .header("ce-source", "https://example.com/client")
            .header("ce-type", "org.example.request")
            .header("ce-id", "36077800-0c23-4f38-a0b4-01f4369f670a")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(r#"{"instances": [[1, 2]]}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers["ce-specversion"], "1.0");
        assert_ne!(headers["ce-id"], "36077800-0c23-4f38-a0b4-01f4369f670a");
        assert!(headers.contains_key("ce-time"));
        assert_eq!(headers[reqwest::header::CONTENT_TYPE], "application/json");
        assert_eq!(response.json::<Value>().await.unwrap(), json!({"predictions": [[1, 2]]}));
    }

    #[rstest]
    #[tokio::test]
    async fn test_binary_cloudevent_invalid_json(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let response = reqwest::Client::new()
            .post(format!("{}/v1/models/echo:predict", server.base_url))
            .header("ce-specversion", "1.0")
            .header("ce-source", "https://example.com/client")
            .header("ce-type", "org.example.request")
            .header("ce-id", "1")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(vec![0xffu8, 0xfe])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(error_of(response).await.starts_with("Failed to decode or parse binary json cloudevent"));
    }

    #[rstest]
    #[tokio::test]
    async fn test_structured_cloudevent(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let event = json!({
            "id": "36077800-0c23-4f38-a0b4-01f4369f670a",
            "source": "https://example.com/client",
            "type": "org.example.request",
            "specversion": "1.0",
            "time": "2021-01-28T21:04:43.144141+00:00",
            "data": {"instances": [[1, 2]]}
        });
        let response = reqwest::Client::new()
            .post(format!("{}/v1/models/echo:predict", server.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/cloudevents+json")
            .body(serde_json::to_vec(&event).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "application/cloudevents+json"
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["specversion"], "1.0");
        assert_eq!(body["data"], json!({"predictions": [[1, 2]]}));
        assert_ne!(body["id"], event["id"]);
    }

    struct EchoLoader;

    #[async_trait]
    impl ModelLoader for EchoLoader {
        async fn load(&self, name: &str, _models_dir: Option<&Path>) -> Result<ModelHandle> {
            Ok(ModelHandle::Local(EchoModel::new(name, false)))
        }
    }

    #[tokio::test]
    async fn test_repository_extension() {
        let repository = Arc::new(ModelRepository::new(None).with_loader(Arc::new(EchoLoader)));
        let server = start(DataPlane::new(repository)).await;
        let client = reqwest::Client::new();

        let load = client
            .post(format!("{}/v2/repository/models/mnist/load", server.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(load.status(), StatusCode::OK);
        assert_eq!(load.json::<Value>().await.unwrap(), json!({"name": "mnist", "load": true}));

        let ready = client.get(format!("{}/v2/models/mnist/ready", server.base_url)).send().await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        let unload = client
            .post(format!("{}/v2/repository/models/mnist/unload", server.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(unload.json::<Value>().await.unwrap(), json!({"name": "mnist", "unload": true}));

        let ready = client.get(format!("{}/v2/models/mnist/ready", server.base_url)).send().await.unwrap();
        assert_eq!(ready.status(), StatusCode::NOT_FOUND);

        let unload = client
            .post(format!("{}/v2/repository/models/mnist/unload", server.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(unload.status(), StatusCode::NOT_FOUND);
    }

    #[rstest]
    #[tokio::test]
    async fn test_repository_load_without_loader(models: Vec<Arc<dyn Model>>) {
        let server = start_with(models).await;
        let response = reqwest::Client::new()
            .post(format!("{}/v2/repository/models/echo/load", server.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    async fn start_transformer(predictor: &RunningService, protocol: PredictorProtocol, model: &str) -> RunningService {
        let client = Arc::new(
            PredictorClient::new(
                format!("127.0.0.1:{}", predictor.port),
                protocol,
                false,
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        let repository = Arc::new(ModelRepository::new(None));
        repository.update_handle(
            model,
            ModelHandle::Remote(Arc::new(PredictorProxyModel::new(model, client.clone()))),
        );
        start(DataPlane::new(repository).with_predictor_health(client)).await
    }

    #[rstest]
    #[tokio::test]
    async fn test_transformer_v1(models: Vec<Arc<dyn Model>>) {
        let predictor = start_with(models).await;
        let transformer = start_transformer(&predictor, PredictorProtocol::RestV1, "echo").await;
        let client = reqwest::Client::new();

        let root = client.get(format!("{}/", transformer.base_url)).send().await.unwrap();
        assert_eq!(root.status(), StatusCode::OK);

        let predict: Value = client
            .post(format!("{}/v1/models/echo:predict", transformer.base_url))
            .header("x-request-id", "trace-me")
            .json(&json!({"instances": [[5, 6]]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(predict, json!({"predictions": [[5, 6]]}));
    }

    #[rstest]
    #[tokio::test]
    async fn test_transformer_v2_binary(models: Vec<Arc<dyn Model>>) {
        let predictor = start_with(models).await;
        let transformer = start_transformer(&predictor, PredictorProtocol::RestV2, "echo").await;

        let mut request = int32_request(true);
        request.parameters.insert(BINARY_DATA_OUTPUT.to_string(), ParameterValue::Bool(true));
        let (body, json_length) = request.to_rest().unwrap();
        let response = reqwest::Client::new()
            .post(format!("{}/v2/models/echo/infer", transformer.base_url))
            .header(INFERENCE_HEADER_CONTENT_LENGTH, json_length.unwrap())
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response_length = response.headers()[INFERENCE_HEADER_CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse::<usize>()
            .unwrap();
        let bytes = response.bytes().await.unwrap();
        let decoded = InferResponse::from_bytes(&bytes, Some(response_length)).unwrap();
        assert_eq!(decoded.id, "req-1");
        assert_eq!(decoded.outputs[0].as_tensor().unwrap(), FlattenTensor::Int32(vec![1, 2, 3, 4]));
    }

    #[rstest]
    #[tokio::test]
    async fn test_transformer_upstream_error(models: Vec<Arc<dyn Model>>) {
        let predictor = start_with(models).await;
        let transformer = start_transformer(&predictor, PredictorProtocol::RestV1, "failing").await;

        let response = reqwest::Client::new()
            .post(format!("{}/v1/models/failing:predict", transformer.base_url))
            .json(&json!({"instances": [1]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(error_of(response).await.contains("model exploded"));
    }

    #[tokio::test]
    async fn test_transformer_predictor_down() {
        let port = get_random_port().await;
        let client = Arc::new(
            PredictorClient::new(format!("127.0.0.1:{port}"), PredictorProtocol::RestV2, false, Duration::from_secs(1))
                .unwrap(),
        );
        let repository = Arc::new(ModelRepository::new(None));
        repository.update_handle(
            "echo",
            ModelHandle::Remote(Arc::new(PredictorProxyModel::new("echo", client.clone()))),
        );
        let dataplane = DataPlane::new(repository).with_predictor_health(client);

        assert!(dataplane.live().await.is_err());
        let err = dataplane.model_ready("echo").await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
