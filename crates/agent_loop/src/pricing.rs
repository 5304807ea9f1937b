use crate::budget::ModelPrice;

/// Model id prefixes and their list prices, most specific prefix first.
const PRICE_TABLE: &[(&str, ModelPrice)] = &[
    ("claude-opus-4-5", ModelPrice::new(5.0, 25.0)),
    ("claude-opus-4", ModelPrice::new(15.0, 75.0)),
    ("claude-sonnet-4", ModelPrice::new(3.0, 15.0)),
    ("claude-haiku-4-5", ModelPrice::new(1.0, 5.0)),
    ("claude-3-7-sonnet", ModelPrice::new(3.0, 15.0)),
    ("claude-3-5-sonnet", ModelPrice::new(3.0, 15.0)),
    ("claude-3-5-haiku", ModelPrice::new(0.8, 4.0)),
    ("claude-3-opus", ModelPrice::new(15.0, 75.0)),
    ("claude-3-haiku", ModelPrice::new(0.25, 1.25)),
];

/// Returns the token price for `model`. Local and unknown models are free.
pub fn price_for_model(model: &str) -> ModelPrice {
    PRICE_TABLE
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, price)| *price)
        .unwrap_or(ModelPrice::FREE)
}
