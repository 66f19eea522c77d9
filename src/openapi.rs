use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::server::{ServerBuilder, ServerVariableBuilder};
use utoipa::{Modify, OpenApi};

/// 控制台接口的 Bearer 会话定义
struct SessionBearerSecurity;

impl Modify for SessionBearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "SessionBearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// 业务接口挂在 `config.api.prefix` 下，`/health` 不带前缀，因此提供两个 server。
struct ApiServers;

impl Modify for ApiServers {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let api = ServerBuilder::new()
            .url("{api_prefix}")
            .description(Some("业务接口（默认 /api）"))
            .parameter(
                "api_prefix",
                ServerVariableBuilder::new()
                    .default_value("/api")
                    .description(Some("对应 config.api.prefix（APP_API__PREFIX）")),
            )
            .build();
        let root = ServerBuilder::new()
            .url("/")
            .description(Some("根路径（/health）"))
            .build();
        openapi.servers = Some(vec![api, root]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::og::handler::render_og,
        crate::features::og::handler::get_catalog,
        crate::features::waitlist::handler::join_waitlist,
        crate::features::waitlist::handler::waitlist_count,
        crate::features::keys::handler::get_dashboard,
        crate::features::keys::handler::create_key,
        crate::features::keys::handler::delete_key,
    ),
    components(schemas(
        crate::error::ProblemDetails,
        crate::features::og::Layout,
        crate::features::og::Pattern,
    )),
    modifiers(&SessionBearerSecurity, &ApiServers),
    tags(
        (name = "OG", description = "OG 图生成：模板/主题/参数合成 1200x630 PNG，以及主题模板目录。"),
        (name = "Waitlist", description = "Pro 等候名单。"),
        (name = "Keys", description = "控制台：API Key 管理与本月用量。"),
        (name = "Health", description = "健康检查：服务探活。"),
    ),
    info(
        title = "ogpix API",
        version = env!("CARGO_PKG_VERSION"),
        description = "OG 图生成服务 API（Axum + utoipa）。除 /health 外，业务接口挂载在 `config.api.prefix`（默认 /api）下，paths 不含该前缀。"
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::ApiDoc;
    use utoipa::OpenApi;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/og", "/og/catalog", "/waitlist", "/keys"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
