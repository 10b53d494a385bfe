use crate::block::BlockOption;

/// The subset of CoAP options the blockwise layer reads and writes.
///
/// A full option registry is out of scope; anything the layer does not
/// touch travels opaquely with the surrounding message model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionSet {
    uri_path: Vec<String>,
    uri_query: Vec<String>,
    content_format: Option<u16>,
    block1: Option<BlockOption>,
    block2: Option<BlockOption>,
    size1: Option<u32>,
    size2: Option<u32>,
    etag: Option<Vec<u8>>,
    observe: Option<u32>,
}

impl OptionSet {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the Uri-Path segments from a `/`-separated path.
    pub fn set_uri_path(&mut self, path: &str) {
        self.uri_path =
            path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
    }

    /// Appends one Uri-Path segment.
    pub fn add_uri_path(&mut self, segment: impl Into<String>) {
        self.uri_path.push(segment.into());
    }

    /// The Uri-Path segments joined with `/`.
    pub fn uri_path_joined(&self) -> String {
        self.uri_path.join("/")
    }

    /// Appends one Uri-Query argument.
    pub fn add_uri_query(&mut self, argument: impl Into<String>) {
        self.uri_query.push(argument.into());
    }

    /// The Uri-Query arguments joined with `&`.
    pub fn uri_query_joined(&self) -> String {
        self.uri_query.join("&")
    }

    /// Content-Format option.
    pub fn content_format(&self) -> Option<u16> {
        self.content_format
    }

    /// Sets the Content-Format option.
    pub fn set_content_format(&mut self, format: u16) {
        self.content_format = Some(format);
    }

    /// Block1 option.
    pub fn block1(&self) -> Option<BlockOption> {
        self.block1
    }

    /// Sets the Block1 option.
    pub fn set_block1(&mut self, block: BlockOption) {
        self.block1 = Some(block);
    }

    /// Removes the Block1 option.
    pub fn clear_block1(&mut self) {
        self.block1 = None;
    }

    /// Block2 option.
    pub fn block2(&self) -> Option<BlockOption> {
        self.block2
    }

    /// Sets the Block2 option.
    pub fn set_block2(&mut self, block: BlockOption) {
        self.block2 = Some(block);
    }

    /// Removes the Block2 option.
    pub fn clear_block2(&mut self) {
        self.block2 = None;
    }

    /// Size1 option, the declared request body size.
    pub fn size1(&self) -> Option<u32> {
        self.size1
    }

    /// Sets the Size1 option.
    pub fn set_size1(&mut self, size: u32) {
        self.size1 = Some(size);
    }

    /// Size2 option, the declared response body size.
    pub fn size2(&self) -> Option<u32> {
        self.size2
    }

    /// Sets the Size2 option.
    pub fn set_size2(&mut self, size: u32) {
        self.size2 = Some(size);
    }

    /// ETag option.
    pub fn etag(&self) -> Option<&[u8]> {
        self.etag.as_deref()
    }

    /// Sets the ETag option.
    pub fn set_etag(&mut self, etag: Vec<u8>) {
        self.etag = Some(etag);
    }

    /// Observe option.
    pub fn observe(&self) -> Option<u32> {
        self.observe
    }

    /// Sets the Observe option.
    pub fn set_observe(&mut self, observe: u32) {
        self.observe = Some(observe);
    }

    /// Removes the Observe option. Block retrieval requests must not carry
    /// Observe.
    pub fn remove_observe(&mut self) {
        self.observe = None;
    }
}
