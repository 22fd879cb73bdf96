pub mod asset_store;
pub mod db;
pub mod document_store;
pub mod fonts;
mod http;
pub mod illustrator;
pub mod print_provider;
pub mod renderer;
pub mod story_llm;

pub use asset_store::HttpAssetStore;
pub use db::DbAdapter;
pub use document_store::DropboxDocumentStore;
pub use fonts::TextFace;
pub use illustrator::OpenAiImageAdapter;
pub use print_provider::LuluAdapter;
pub use renderer::PdfRenderer;
pub use story_llm::OpenAiStoryAdapter;
