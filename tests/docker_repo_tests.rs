// Optional DockerRepo tests when Docker daemon is available

use portpolicy::docker_repo::{ContainerRuntime, DockerRepo};

async fn repo() -> Option<DockerRepo> {
    let repo = DockerRepo::connect().ok()?;
    // Skip when Docker is not available (e.g. CI without Docker)
    repo.ping().await.ok()?;
    Some(repo)
}

#[tokio::test]
async fn inspect_missing_container_is_none() {
    let Some(repo) = repo().await else {
        return;
    };
    let found = repo
        .inspect("portpolicy-test-container-that-does-not-exist")
        .await
        .unwrap();
    assert!(found.is_none());
}
