use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bulwark API",
        version = "0.1.0",
        description = "Reader-mode article extraction and caching image proxy, behind rate limits and circuit breakers."
    ),
    paths(
        crate::routes::read_content,
        crate::routes::proxy_image,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ReadRequest,
        crate::dto::ReadResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "read", description = "Reader-mode extraction"),
        (name = "image", description = "Image proxy"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
