// Event kinds carried in the `type` field of every pushed frame.
// Clients match on these strings verbatim, spaces included.

// products
pub const PRODUCT_CREATED: &str = "Product created";
pub const PRODUCT_UPDATED: &str = "Product updated";
