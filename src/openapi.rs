//! OpenAPI document for the payload and description types.
//!
//! Resources are discovered at runtime, so only the shapes that do not depend
//! on the schema are documented here; `/resources` and `/{resource}/meta`
//! describe the rest.

use crate::model::{Description, FieldDescription, RelationDescription};
use crate::query::{FetchPayload, FilterSpec, PaginationSpec, RelatedColumns, SortSpec};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "autocrud",
        description = "Filterable, paginated REST resources generated from a relational schema"
    ),
    components(schemas(
        FetchPayload,
        FilterSpec,
        SortSpec,
        PaginationSpec,
        RelatedColumns,
        Description,
        FieldDescription,
        RelationDescription
    ))
)]
pub struct ApiDoc;
