pub mod books;
pub mod domain;
pub mod jobs;
pub mod layout;
pub mod orders;
pub mod pages;
pub mod ports;
pub mod stages;
pub mod status;

#[cfg(test)]
pub mod testing;

pub use books::BookService;
pub use domain::{
    ArtStyle, Book, BookStatus, FulfillmentStep, ModerationStatus, Page, PrintOrder,
    PrintOrderStatus, ShippingAddress, ShippingLevel,
};
pub use jobs::{
    BookFinalizationJob, IllustrationGenerationJob, JobKind, PrintFulfillmentJob, RetryPolicy,
    StoryGenerationJob,
};
pub use orders::{OrderRequest, OrderService};
pub use pages::PageEditor;
pub use ports::{
    AssetStore, BookRepository, DocumentStore, Illustrator, JobQueue, OrderRepository,
    PageRenderer, PortError, PortResult, PrintProvider, StoryWriter,
};
pub use status::{Progress, StatusService};
