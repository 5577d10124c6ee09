use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Harvest API",
        version = "0.1.0",
        description = "Keyword-driven web collection from configurable sources, with streamed results and LLM enrichment."
    ),
    paths(
        crate::routes::list_sources,
        crate::routes::start_collection,
        crate::routes::collection_status,
        crate::routes::stop_collection,
        crate::routes::stream_collection,
        crate::routes::save_records,
        crate::routes::list_records,
        crate::routes::delete_record,
        crate::routes::get_deep_result,
        crate::routes::start_deep_collection,
        crate::routes::deep_collection_status,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::SourceResponse,
        crate::dto::SourceListResponse,
        crate::dto::StartCollectionRequest,
        crate::dto::StartCollectionResponse,
        crate::dto::CollectionStatusResponse,
        crate::dto::SaveRecordsRequest,
        crate::dto::SaveRecordsResponse,
        crate::dto::SavedRecordResponse,
        crate::dto::RecordListResponse,
        crate::dto::StartDeepCollectionRequest,
        crate::dto::StartDeepCollectionResponse,
        crate::dto::DeepTaskResponse,
        crate::dto::DeepResultResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "sources", description = "Configured scraping sources"),
        (name = "collections", description = "Collection jobs and result streams"),
        (name = "records", description = "Saved records"),
        (name = "deep", description = "LLM deep collection"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds the bearer token security scheme.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some("API key, set via HARVEST_SERVER_API_KEY."))
                        .build(),
                ),
            );
        }
    }
}
