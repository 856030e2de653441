use crate::model::{CartItem, Discount, DiscountType};

/// Price breakdown for one cart line. The total is not clamped; a discount larger
/// than the subtotal yields a negative total.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pricing {
    pub subtotal: f64,
    pub discount_value: f64,
    pub total: f64,
}

impl Pricing {
    pub fn new(subtotal: f64, discount: Discount) -> Self {
        let discount_value = discount_value(subtotal, discount);
        Self {
            subtotal,
            discount_value,
            total: subtotal - discount_value,
        }
    }

    pub fn for_item(item: &CartItem, discount: Discount) -> Self {
        Self::new(subtotal(item), discount)
    }
}

pub fn subtotal(item: &CartItem) -> f64 {
    item.item_price
        + item
            .extras
            .iter()
            .map(|extra| extra.item_extra_price)
            .sum::<f64>()
}

pub fn discount_value(subtotal: f64, discount: Discount) -> f64 {
    match discount.discount_type {
        Some(DiscountType::Percentage) => subtotal * discount.discount_amount / 100.0,
        Some(DiscountType::Amount) => discount.discount_amount,
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CartExtra;

    fn discount(amount: f64, kind: Option<DiscountType>) -> Discount {
        Discount {
            discount_amount: amount,
            discount_type: kind,
        }
    }

    #[test]
    fn percentage_amount_and_none() {
        let p = Pricing::new(100.0, discount(10.0, Some(DiscountType::Percentage)));
        assert_eq!((p.discount_value, p.total), (10.0, 90.0));

        let p = Pricing::new(100.0, discount(30.0, Some(DiscountType::Amount)));
        assert_eq!(p.total, 70.0);

        let p = Pricing::new(100.0, discount(30.0, None));
        assert_eq!((p.discount_value, p.total), (0.0, 100.0));
    }

    #[test]
    fn extras_add_to_subtotal() {
        let item = CartItem {
            invoice_id: 1,
            brand_id: 2,
            service_name: "Full wash".into(),
            item_price: 150.0,
            extras: vec![CartExtra {
                name: "Wax".into(),
                item_extra_price: 50.0,
            }],
        };
        let p = Pricing::for_item(&item, discount(10.0, Some(DiscountType::Percentage)));
        assert_eq!(p.subtotal, 200.0);
        assert_eq!(p.total, 180.0);
    }

    #[test]
    fn oversized_flat_discount_goes_negative() {
        let p = Pricing::new(20.0, discount(30.0, Some(DiscountType::Amount)));
        assert_eq!(p.total, -10.0);
    }
}
