/// A named request fixture used as benchmark input.
#[derive(Debug, Copy, Clone)]
pub struct RequestFixture {
    name: &'static str,
    content: &'static str,
}

impl RequestFixture {
    pub const fn new(name: &'static str, content: &'static str) -> Self {
        Self { name, content }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn content(&self) -> &'static str {
        self.content
    }
}
