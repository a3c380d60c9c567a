//! Provider calls shared by the node services
//!
//! Each helper resolves the starting model, runs the provider call under
//! the fallback executor and returns the output with its provenance.

use std::future::Future;

use model_router::{
    poll_video_task, AudioRequest, ImageOptions, ModelCategory, RouterError, TextRequest, VideoJob,
    VideoJobResult, VideoRequest,
};
use node_engine::{
    Artifact, CacheKey, GeneratedArtifacts, GenerationInfo, Node, Result, ServiceDeps,
};

/// Generate images, failing over when a model returns nothing
pub(crate) async fn generate_images(
    deps: &ServiceDeps,
    model: Option<&str>,
    prompt: &str,
    reference_images: &[String],
    options: &ImageOptions,
) -> Result<(Vec<String>, GenerationInfo)> {
    let provider = deps.providers.image()?.as_ref();
    let generated = deps
        .generate_with_fallback(ModelCategory::Image, model, move |model| async move {
            let urls = provider
                .generate_images(prompt, &model, reference_images, options)
                .await?;
            if urls.is_empty() {
                return Err(RouterError::provider(format!("{} returned no images", model)));
            }
            Ok(urls)
        })
        .await?;
    Ok(generated)
}

pub(crate) async fn generate_text(
    deps: &ServiceDeps,
    model: Option<&str>,
    request: &TextRequest,
) -> Result<(String, GenerationInfo)> {
    let provider = deps.providers.text()?.as_ref();
    let generated = deps
        .generate_with_fallback(ModelCategory::Text, model, move |model| async move {
            provider.generate_text(&model, request).await
        })
        .await?;
    Ok(generated)
}

pub(crate) async fn generate_audio(
    deps: &ServiceDeps,
    model: Option<&str>,
    request: &AudioRequest,
) -> Result<(String, GenerationInfo)> {
    let provider = deps.providers.audio()?.as_ref();
    let generated = deps
        .generate_with_fallback(ModelCategory::Audio, model, move |model| async move {
            provider.generate_audio(&model, request).await
        })
        .await?;
    Ok(generated)
}

/// Submit and poll a video job on each model of the fallback chain
pub(crate) async fn generate_video(
    deps: &ServiceDeps,
    node_id: &str,
    model: Option<&str>,
    sub_model: Option<&str>,
    request: &VideoRequest,
    on_progress: &(dyn Fn(f32) + Send + Sync),
) -> Result<(VideoJobResult, GenerationInfo)> {
    let provider = deps.providers.video()?.as_ref();
    let context = deps.provider_context(node_id);
    let context = &context;
    let api_key = deps.providers.api_key(ModelCategory::Video);
    let poll_config = &deps.poll_config;
    let cancel = &deps.cancel;

    let generated = deps
        .generate_with_fallback(ModelCategory::Video, model, move |model| async move {
            let job = VideoJob {
                model: &model,
                request,
                api_key,
                context,
                sub_model,
            };
            poll_video_task(provider, job, poll_config, cancel, Some(on_progress)).await
        })
        .await?;
    Ok(generated)
}

/// Serve a node's artifacts from the cache or run `generate` and persist
/// its output. Returns the artifacts, their provenance and whether they
/// came from the cache.
pub(crate) async fn cached_generation<F, Fut>(
    deps: &ServiceDeps,
    node: &Node,
    generate: F,
) -> Result<(Vec<Artifact>, Option<GenerationInfo>, bool)>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(Vec<Artifact>, GenerationInfo)>>,
{
    let key = CacheKey {
        workspace_id: &deps.workspace_id,
        node_id: &node.id,
        node_type: node.node_type(),
    };

    let cached = deps
        .cache
        .get_or_generate(key, || async move {
            let (artifacts, info) = generate().await?;
            let mut params = serde_json::Map::new();
            params.insert("generation".to_string(), serde_json::to_value(&info)?);
            Ok(GeneratedArtifacts {
                artifacts,
                params: params.into(),
            })
        })
        .await?;

    let info = cached
        .params
        .get("generation")
        .and_then(|v| serde_json::from_value::<GenerationInfo>(v.clone()).ok())
        .map(|info| if cached.from_cache { info.cached() } else { info });
    Ok((cached.artifacts, info, cached.from_cache))
}

/// First non-empty value of an optional field and an upstream fallback
pub(crate) fn first_non_empty(own: Option<&str>, upstream: Option<String>) -> Option<String> {
    own.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or(upstream)
}
