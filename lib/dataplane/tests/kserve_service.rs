// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

#[path = "common/ports.rs"]
mod ports;

#[path = "common/models.rs"]
mod models;

pub mod kserve_test {
    use kserve_dataplane::grpc::service::kserve::KserveService;
    use kserve_dataplane::grpc::service::kserve::inference;
    use kserve_dataplane::{DataPlane, ModelRepository};
    use inference::grpc_inference_service_client::GrpcInferenceServiceClient;
    use inference::{
        InferParameter, ModelInferRequest, ModelMetadataRequest, ModelReadyRequest,
        RepositoryModelUnloadRequest, ServerLiveRequest, ServerMetadataRequest, ServerReadyRequest,
    };

    use kserve_runtime::CancellationToken;
    use rstest::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tonic::{Code, Request, transport::Channel};

    use crate::models::{BrokenModel, EchoModel, FailingModel};
    use crate::ports::get_random_port;

    /// Wait for the gRPC service to accept connections
    async fn get_ready_client(port: u16, timeout_secs: u64) -> GrpcInferenceServiceClient<Channel> {
        let start = tokio::time::Instant::now();
        let timeout = tokio::time::Duration::from_secs(timeout_secs);
        loop {
            let address = format!("http://127.0.0.1:{}", port);
            match GrpcInferenceServiceClient::connect(address).await {
                Ok(client) => return client,
                Err(_) if start.elapsed() < timeout => {
                    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                }
                Err(e) => panic!("Service failed to start within timeout: {}", e),
            }
        }
    }

    struct RunningService {
        token: CancellationToken,
    }

    impl RunningService {
        fn spawn(service: KserveService) -> Self {
            let token = CancellationToken::new();
            tokio::spawn({
                let t = token.clone();
                async move { service.run(t).await }
            });
            Self { token }
        }
    }

    impl Drop for RunningService {
        fn drop(&mut self) {
            self.token.cancel();
        }
    }

    struct TestServer {
        client: GrpcInferenceServiceClient<Channel>,
        lazy: Arc<EchoModel>,
        _running: RunningService,
    }

    async fn start_server() -> TestServer {
        let repository = Arc::new(ModelRepository::new(None));
        repository.update(EchoModel::new("echo", true));
        repository.update(Arc::new(FailingModel));
        repository.update(Arc::new(BrokenModel));
        let lazy = EchoModel::new("lazy", false);
        repository.update(lazy.clone());

        let port = get_random_port().await;
        let service = KserveService::builder()
            .host("127.0.0.1")
            .port(port)
            .dataplane(Arc::new(DataPlane::new(repository)))
            .build()
            .unwrap();
        let running = RunningService::spawn(service);
        let client = get_ready_client(port, 5).await;
        TestServer {
            client,
            lazy,
            _running: running,
        }
    }

    fn uint_input(values: Vec<u32>) -> inference::model_infer_request::InferInputTensor {
        inference::model_infer_request::InferInputTensor {
            name: "int_input".into(),
            datatype: "UINT32".into(),
            shape: vec![2, 2],
            contents: Some(inference::InferTensorContents {
                uint_contents: values,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[fixture]
    fn int_input() -> inference::model_infer_request::InferInputTensor {
        uint_input(vec![1, 2, 3, 4])
    }

    #[fixture]
    fn text_input() -> inference::model_infer_request::InferInputTensor {
        inference::model_infer_request::InferInputTensor {
            name: "text_input".into(),
            datatype: "BYTES".into(),
            shape: vec![2],
            contents: Some(inference::InferTensorContents {
                bytes_contents: vec![b"ab".to_vec(), b"cde".to_vec()],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn request(model: &str, inputs: Vec<inference::model_infer_request::InferInputTensor>) -> ModelInferRequest {
        ModelInferRequest {
            model_name: model.into(),
            id: "req-1".into(),
            inputs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_server_health_and_metadata() {
        let mut server = start_server().await;

        let live = server.client.server_live(Request::new(ServerLiveRequest {})).await.unwrap();
        assert!(live.into_inner().live);

        // "lazy" and "broken" are registered but not ready
        let ready = server.client.server_ready(Request::new(ServerReadyRequest {})).await.unwrap();
        assert!(!ready.into_inner().ready);

        let metadata = server
            .client
            .server_metadata(Request::new(ServerMetadataRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(metadata.name, "kserve-dataplane");
        assert_eq!(metadata.extensions, vec!["model_repository_extension".to_string()]);

        let model = server
            .client
            .model_metadata(Request::new(ModelMetadataRequest {
                name: "echo".into(),
                version: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(model.name, "echo");
    }

    #[rstest]
    #[tokio::test]
    async fn test_infer_typed_contents(
        int_input: inference::model_infer_request::InferInputTensor,
        text_input: inference::model_infer_request::InferInputTensor,
    ) {
        let mut server = start_server().await;
        let response = server
            .client
            .model_infer(Request::new(request("echo", vec![int_input, text_input])))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.id, "req-1");
        assert_eq!(response.model_name, "echo");
        assert!(response.raw_output_contents.is_empty());

        let ints = &response.outputs[0];
        assert_eq!(ints.name, "int_input");
        assert_eq!(ints.datatype, "UINT32");
        assert_eq!(ints.shape, vec![2, 2]);
        assert_eq!(ints.contents.as_ref().unwrap().uint_contents, vec![1, 2, 3, 4]);

        let text = &response.outputs[1];
        assert_eq!(
            text.contents.as_ref().unwrap().bytes_contents,
            vec![b"ab".to_vec(), b"cde".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_infer_raw_contents() {
        let mut server = start_server().await;
        let mut infer_request = request(
            "echo",
            vec![
                inference::model_infer_request::InferInputTensor {
                    name: "half".into(),
                    datatype: "FP16".into(),
                    shape: vec![2],
                    ..Default::default()
                },
                inference::model_infer_request::InferInputTensor {
                    name: "text".into(),
                    datatype: "BYTES".into(),
                    shape: vec![2],
                    ..Default::default()
                },
            ],
        );
        let half = [0x3c00u16, 0xc000].iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>();
        let text = b"\x02\x00\x00\x00ab\x03\x00\x00\x00cde".to_vec();
        infer_request.raw_input_contents = vec![half.clone(), text.clone()];

        let response = server
            .client
            .model_infer(Request::new(infer_request))
            .await
            .unwrap()
            .into_inner();

        assert!(response.outputs.iter().all(|output| output.contents.is_none()));
        assert_eq!(response.raw_output_contents, vec![half, text]);
    }

    #[tokio::test]
    async fn test_infer_mismatched_raw_contents() {
        let mut server = start_server().await;
        let mut infer_request = request("echo", vec![uint_input(vec![1, 2, 3, 4])]);
        infer_request.raw_input_contents = vec![vec![0u8; 16], vec![0u8; 16]];

        let status = server
            .client
            .model_infer(Request::new(infer_request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_infer_parameter_without_value() {
        let mut server = start_server().await;
        let mut infer_request = request("echo", vec![uint_input(vec![1, 2, 3, 4])]);
        infer_request.parameters = HashMap::from([(
            "empty".to_string(),
            InferParameter {
                parameter_choice: None,
            },
        )]);

        let status = server
            .client
            .model_infer(Request::new(infer_request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("has no value"));
    }

    #[tokio::test]
    async fn test_infer_shape_mismatch() {
        let mut server = start_server().await;
        let status = server
            .client
            .model_infer(Request::new(request("echo", vec![uint_input(vec![1, 2, 3])])))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("expected 4 elements"));
    }

    #[rstest]
    #[case("missing", Code::NotFound)]
    #[case("failing", Code::Internal)]
    #[case("broken", Code::Unavailable)]
    #[tokio::test]
    async fn test_infer_errors(#[case] model: &str, #[case] code: Code) {
        let mut server = start_server().await;
        let status = server
            .client
            .model_infer(Request::new(request(model, vec![uint_input(vec![1, 2, 3, 4])])))
            .await
            .unwrap_err();
        assert_eq!(status.code(), code);
    }

    #[tokio::test]
    async fn test_model_loaded_on_first_infer() {
        let mut server = start_server().await;
        let ready_request = || {
            Request::new(ModelReadyRequest {
                name: "lazy".into(),
                version: String::new(),
            })
        };

        let ready = server.client.model_ready(ready_request()).await.unwrap();
        assert!(!ready.into_inner().ready);

        server
            .client
            .model_infer(Request::new(request("lazy", vec![uint_input(vec![1, 2, 3, 4])])))
            .await
            .unwrap();
        server
            .client
            .model_infer(Request::new(request("lazy", vec![uint_input(vec![1, 2, 3, 4])])))
            .await
            .unwrap();
        assert_eq!(server.lazy.loads.load(Ordering::SeqCst), 1);

        let ready = server.client.model_ready(ready_request()).await.unwrap();
        assert!(ready.into_inner().ready);
    }

    #[tokio::test]
    async fn test_repository_unload() {
        let mut server = start_server().await;
        let reply = server
            .client
            .repository_model_unload(Request::new(RepositoryModelUnloadRequest {
                model_name: "echo".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(reply.is_unloaded);

        let status = server
            .client
            .model_ready(Request::new(ModelReadyRequest {
                name: "echo".into(),
                version: String::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "Model with name echo does not exist.");
    }
}
