use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_core::config::Config;
use kiln_core::{Assistant, GenerationError, Orchestrator, PipelineError};
use kiln_index::{InMemoryVectorStore, IndexStore, Retriever, SqliteVectorStore, build_context};
use kiln_llm::mock::MockProvider;

// -- Fixtures --

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn shop_repo(root: &Path) {
    write(root, "requirements.txt", "flask==3.0\npsycopg2-binary==2.9\n");
    write(
        root,
        "app.py",
        "from flask import Flask\n\napp = Flask(__name__)\n\n\
         @app.get('/health')\ndef health():\n    return 'ok'\n",
    );
    write(
        root,
        "frontend/package.json",
        r#"{"name": "storefront", "engines": {"node": ">=18"}}"#,
    );
    write(
        root,
        "frontend/src/index.js",
        "const express = require('express');\nexpress().listen(3000);\n",
    );
}

fn memory_store() -> IndexStore {
    IndexStore::new(Arc::new(InMemoryVectorStore::new()))
}

fn orchestrator(store: IndexStore, provider: &Arc<MockProvider>) -> Orchestrator<MockProvider> {
    Orchestrator::new(store, Arc::clone(provider), &Config::default()).unwrap()
}

fn files_under(dir: &Path) -> BTreeSet<PathBuf> {
    let mut out = BTreeSet::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.insert(path.strip_prefix(dir).unwrap().to_path_buf());
            }
        }
    }
    out
}

fn expected_shop_files() -> BTreeSet<PathBuf> {
    ["Dockerfile", "frontend/Dockerfile", "docker-compose.yml"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

// -- Scenario A: two services, three files --

#[tokio::test]
async fn two_services_yield_three_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);

    let provider = Arc::new(
        MockProvider::default().with_default_response("```dockerfile\nFROM scratch\n```"),
    );
    let orch = orchestrator(memory_store(), &provider);
    let report = orch.run(&root, None).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.services, vec!["shop", "frontend"]);
    assert_eq!(report.written.len(), 3);
    assert_eq!(files_under(&root.join("infra")), expected_shop_files());
    assert_eq!(
        std::fs::read_to_string(root.join("infra/frontend/Dockerfile")).unwrap(),
        "FROM scratch\n"
    );

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    let compose_prompt = &requests[2][1].content;
    assert!(compose_prompt.contains("docker-compose.yml"));
    assert!(compose_prompt.contains("- shop (python)"));
    assert!(compose_prompt.contains("- frontend (javascript) at `frontend`"));
}

#[tokio::test]
async fn service_prompts_carry_provenance_and_version_hints() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);

    let provider = Arc::new(MockProvider::default());
    let orch = orchestrator(memory_store(), &provider);
    orch.run(&root, None).await.unwrap();

    let requests = provider.requests();
    let frontend = requests
        .iter()
        .map(|r| &r[1].content)
        .find(|c| c.contains("service `frontend`"))
        .unwrap();
    assert!(frontend.contains("# Project: shop"));
    assert!(frontend.contains("# File: frontend/src/index.js [1:2]"));
    assert!(frontend.contains("node:18-alpine"));
    assert!(frontend.contains("entrypoint: not detected"));
}

// -- Scenario B: nothing to build --

#[tokio::test]
async fn repo_without_manifests_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("notes");
    write(&root, "README.md", "# Notes\n\nJust some notes, nothing to build.\n");
    write(&root, "scripts/cleanup.py", "import shutil\nshutil.rmtree('/tmp/cache')\n");

    let provider = Arc::new(MockProvider::default());
    let orch = orchestrator(memory_store(), &provider);
    let err = orch.run(&root, None).await.unwrap_err();

    assert!(matches!(err, PipelineError::NoServicesDetected(_)));
    assert!(!root.join("infra").exists());
    assert!(provider.requests().is_empty());
}

// -- Scenario C: embedding service unreachable --

#[tokio::test]
async fn embedding_outage_keeps_earlier_records() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    write(&root, "requirements.txt", "flask==3.0\n");
    write(&root, "a_models.py", "class Order:\n    total: int = 0\n");
    write(&root, "b_views.py", "def index():\n    return 'orders'\n");

    let store = memory_store();
    let provider = Arc::new(MockProvider::default().with_embed_failure_after(1));
    let orch = orchestrator(store.clone(), &provider);
    let err = orch.run(&root, None).await.unwrap_err();

    let PipelineError::Retrieval(source) = &err else {
        panic!("expected a retrieval error, got {err:?}");
    };
    assert!(source.is_retrieval());
    assert_eq!(
        store.record_ids("shop").await.unwrap(),
        vec!["shop:a_models.py:0".to_owned()]
    );
    assert!(provider.requests().is_empty());
    assert!(!root.join("infra").exists());
}

// -- Scenario D: aggregate heals a missing per-service artifact --

#[tokio::test]
async fn aggregate_regenerates_missing_service_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);

    let store = memory_store();
    let provider = Arc::new(MockProvider::default().with_default_response("FROM scratch"));
    let orch = orchestrator(store, &provider);
    orch.run(&root, None).await.unwrap();

    std::fs::remove_file(root.join("infra/frontend/Dockerfile")).unwrap();
    std::fs::remove_file(root.join("infra/docker-compose.yml")).unwrap();
    let before = provider.requests().len();

    let report = orch.generate_aggregate_artifact("shop", None).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(files_under(&root.join("infra")), expected_shop_files());

    let requests = provider.requests();
    let new_requests = &requests[before..];
    assert_eq!(new_requests.len(), 2);
    assert!(new_requests[0][1].content.contains("service `frontend`"));
    assert!(new_requests[1][1].content.contains("docker-compose.yml"));
}

// -- Failure isolation --

#[tokio::test]
async fn failing_service_is_reported_and_left_out_of_compose() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);
    write(&root, "worker/go.mod", "module shop/worker\n\ngo 1.22\n");
    write(&root, "worker/main.go", "package main\n\nfunc main() { select {} }\n");

    let provider = Arc::new(
        MockProvider::default()
            .with_default_response("FROM scratch")
            .with_chat_failure_on("Write a Dockerfile for the service `worker`")
            .with_delay(5),
    );
    let orch = orchestrator(memory_store(), &provider);
    let report = orch.run(&root, None).await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].service, "worker");
    assert_eq!(report.failures[0].path, "worker");
    assert!(root.join("infra/frontend/Dockerfile").is_file());
    assert!(!root.join("infra/worker/Dockerfile").exists());

    let compose_prompt = provider
        .requests()
        .into_iter()
        .map(|r| r[1].content.clone())
        .find(|c| c.contains("docker-compose.yml"))
        .unwrap();
    assert!(!compose_prompt.contains("- worker"));
}

#[tokio::test]
async fn same_named_services_in_different_directories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("mono");
    write(&root, "apps/api/package.json", r#"{"name": "api"}"#);
    write(&root, "apps/api/server.js", "require('http').createServer().listen(8080);\n");
    write(&root, "services/api/go.mod", "module mono/api\n\ngo 1.22\n");
    write(&root, "services/api/main.go", "package main\n\nfunc main() { select {} }\n");

    let provider = Arc::new(
        MockProvider::default()
            .with_default_response("FROM scratch")
            .with_chat_failure_on("path: apps/api"),
    );
    let orch = orchestrator(memory_store(), &provider);
    let report = orch.run(&root, None).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].service, "api");
    assert_eq!(report.failures[0].path, "apps/api");
    assert_eq!(
        files_under(&root.join("infra")),
        ["services/api/Dockerfile", "docker-compose.yml"]
            .into_iter()
            .map(PathBuf::from)
            .collect()
    );
    let compose_prompt = provider
        .requests()
        .into_iter()
        .map(|r| r[1].content.clone())
        .find(|c| c.contains("docker-compose.yml"))
        .unwrap();
    assert!(compose_prompt.contains("at `services/api`"));
}

#[tokio::test]
async fn failed_compose_leaves_output_folder_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);

    let provider = Arc::new(
        MockProvider::default()
            .with_default_response("FROM scratch")
            .with_chat_failure_on("docker-compose"),
    );
    let orch = orchestrator(memory_store(), &provider);
    let err = orch.run(&root, None).await.unwrap_err();

    assert!(matches!(err, PipelineError::Generation { .. }));
    assert!(!root.join("infra").exists());
    // both per-service prompts were still sent
    assert_eq!(
        provider
            .requests()
            .iter()
            .filter(|r| r[1].content.contains("Write a Dockerfile"))
            .count(),
        2
    );
}

#[tokio::test]
async fn all_services_failing_is_a_generation_error() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);

    let provider = Arc::new(MockProvider::failing());
    let orch = Orchestrator::new(memory_store(), provider, &Config::default()).unwrap();
    let err = orch.run(&root, None).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Generation {
            source: GenerationError::NoServiceArtifacts,
            ..
        }
    ));
}

// -- Retrieval, context and persistence --

#[tokio::test]
async fn retrieval_respects_k_and_context_budget() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);
    for i in 0..8 {
        write(
            &root,
            &format!("handlers/h{i}.py"),
            &format!("def handler_{i}(request):\n    return {{'id': {i}}}\n"),
        );
    }

    let store = memory_store();
    let provider = Arc::new(MockProvider::default());
    let orch = orchestrator(store.clone(), &provider);
    orch.ensure_indexed(&std::fs::canonicalize(&root).unwrap(), "shop")
        .await
        .unwrap();

    let retriever = Retriever::new(store, provider);
    let hits = retriever
        .retrieve_ranked("request handlers", 3, Some("shop"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let context = build_context(&hits, 150);
    assert!(context.chars().count() <= 150);
}

#[tokio::test]
async fn sqlite_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);
    let db_path = dir.path().join("data/kiln.db");
    let db = db_path.to_str().unwrap();

    {
        let store = IndexStore::new(Arc::new(SqliteVectorStore::open(db).await.unwrap()));
        let orch = Orchestrator::new(store, Arc::new(MockProvider::default()), &Config::default())
            .unwrap();
        let report = orch.run(&root, None).await.unwrap();
        assert!(report.index.is_some());
    }

    let store = IndexStore::new(Arc::new(SqliteVectorStore::open(db).await.unwrap()));
    assert!(store.list_projects().await.unwrap().contains("shop"));
    assert_eq!(store.record_count("shop").await.unwrap(), 2);
    let meta = store.get_metadata("shop").await.unwrap();
    assert_eq!(
        meta.project_root,
        Some(std::fs::canonicalize(&root).unwrap())
    );

    let orch = Orchestrator::new(store, Arc::new(MockProvider::default()), &Config::default())
        .unwrap();
    let report = orch.run(&root, None).await.unwrap();
    assert!(report.index.is_none());
}

#[tokio::test]
async fn interrupted_indexing_is_resumed_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);
    let db_path = dir.path().join("kiln.db");
    let db = db_path.to_str().unwrap();

    {
        let store = IndexStore::new(Arc::new(SqliteVectorStore::open(db).await.unwrap()));
        let provider = Arc::new(MockProvider::default().with_embed_failure_after(1));
        let err = orchestrator(store, &provider).run(&root, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Retrieval(_)));
    }

    let store = IndexStore::new(Arc::new(SqliteVectorStore::open(db).await.unwrap()));
    assert!(store.list_projects().await.unwrap().contains("shop"));
    assert!(!store.get_metadata("shop").await.unwrap().index_complete);

    let provider = Arc::new(MockProvider::default());
    let report = orchestrator(store.clone(), &provider).run(&root, None).await.unwrap();
    assert!(report.index.is_some());
    assert_eq!(store.record_count("shop").await.unwrap(), 2);
    assert!(store.get_metadata("shop").await.unwrap().index_complete);
}

#[tokio::test]
async fn ask_answers_from_indexed_code() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    shop_repo(&root);

    let store = memory_store();
    let provider = Arc::new(MockProvider::default().with_default_response("Port 3000.\n"));
    let orch = orchestrator(store.clone(), &provider);
    orch.ensure_indexed(&std::fs::canonicalize(&root).unwrap(), "shop")
        .await
        .unwrap();

    let assistant = Assistant::new(store, Arc::clone(&provider), &Config::default());
    let answer = assistant
        .ask("which port does the frontend use?", None)
        .await
        .unwrap();
    assert_eq!(answer, "Port 3000.");
    assert!(provider.requests()[0][0].content.contains("listen(3000)"));
}
