use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, BookingApi};
use crate::identity::{AuthTokenProvider, CartProvider};
use crate::model::{CartSelection, Discount, PaymentRequest, TimeSlot};
use crate::pricing::{self, Pricing};
use crate::storage::{
    SelectionStore, IS_SLOT_LOCKED, SELECTED_INVOICE_ID, SELECTED_SLOT_ID, SELECTION_KEYS,
    SLOT_DETAILS,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    #[error("please sign in to continue")]
    NotAuthenticated,
    #[error("select an item first")]
    NoItemSelected,
    #[error("enter a valid discount code")]
    EmptyDiscountCode,
    #[error("invalid discount code")]
    InvalidDiscount,
    #[error("discount exceeds the item price")]
    DiscountExceedsSubtotal,
    #[error("select a time slot first")]
    NoSlotSelected,
    #[error("select an address and a car first")]
    AddressAndCarRequired,
    #[error("the selected time slot is no longer available")]
    SlotUnavailable,
    #[error("the selected item changed, please try again")]
    SelectionChanged,
    #[error("payment failed: {0}")]
    PaymentFailed(String),
}

/// Where the UI goes after a successful payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Hand the browser over to the external payment gateway.
    Redirect(String),
    /// Payment settled immediately; the cart was refreshed.
    ShowOrders,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckoutView {
    pub selection: CartSelection,
    pub notice: Option<CheckoutError>,
    pub processing: bool,
}

pub struct CheckoutCoordinator {
    api: Arc<dyn BookingApi>,
    cart: Arc<dyn CartProvider>,
    auth: Arc<dyn AuthTokenProvider>,
    store: Arc<dyn SelectionStore>,
    state: watch::Sender<CheckoutView>,
    epoch: AtomicU64,
}

impl CheckoutCoordinator {
    pub fn new(
        api: Arc<dyn BookingApi>,
        cart: Arc<dyn CartProvider>,
        auth: Arc<dyn AuthTokenProvider>,
        store: Arc<dyn SelectionStore>,
    ) -> Self {
        Self::with_selection(api, cart, auth, store, CartSelection::default())
    }

    /// Rehydrates the selection persisted by a previous run.
    pub fn restore(
        api: Arc<dyn BookingApi>,
        cart: Arc<dyn CartProvider>,
        auth: Arc<dyn AuthTokenProvider>,
        store: Arc<dyn SelectionStore>,
    ) -> Self {
        let selection = read_selection(store.as_ref());
        if let Some(invoice_id) = selection.selected_invoice_id {
            info!(
                invoice_id,
                slot_id = ?selection.selected_slot_id,
                locked = selection.is_slot_locked,
                "checkout selection restored"
            );
        }
        Self::with_selection(api, cart, auth, store, selection)
    }

    fn with_selection(
        api: Arc<dyn BookingApi>,
        cart: Arc<dyn CartProvider>,
        auth: Arc<dyn AuthTokenProvider>,
        store: Arc<dyn SelectionStore>,
        selection: CartSelection,
    ) -> Self {
        let (state, _) = watch::channel(CheckoutView {
            selection,
            ..CheckoutView::default()
        });
        Self {
            api,
            cart,
            auth,
            store,
            state,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CheckoutView> {
        self.state.subscribe()
    }

    pub fn selection(&self) -> CartSelection {
        self.state.borrow().selection.clone()
    }

    pub fn notice(&self) -> Option<CheckoutError> {
        self.state.borrow().notice.clone()
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Selection together with the epoch it belongs to.
    fn current(&self) -> (CartSelection, u64) {
        let view = self.state.borrow();
        (view.selection.clone(), self.epoch())
    }

    fn fail<T>(&self, error: CheckoutError) -> Result<T, CheckoutError> {
        debug!(%error, "checkout operation rejected");
        self.state
            .send_modify(|view| view.notice = Some(error.clone()));
        Err(error)
    }

    /// Selecting the current item again deselects it.
    pub fn select_item(&self, invoice_id: i64) {
        let mut deselected = false;
        self.state.send_modify(|view| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            if view.selection.selected_invoice_id == Some(invoice_id) {
                view.selection = CartSelection::default();
                deselected = true;
            } else {
                view.selection = CartSelection::for_item(invoice_id);
            }
            view.notice = None;
        });

        for key in SELECTION_KEYS {
            self.store.remove(key);
        }
        if deselected {
            debug!(invoice_id, "cart item deselected");
        } else {
            self.store.set(SELECTED_INVOICE_ID, json!(invoice_id));
            debug!(invoice_id, "cart item selected");
        }
    }

    /// Records a slot the user picked without holding it server-side yet.
    pub fn save_time_slot_info(&self, slot: TimeSlot) {
        let slot_id = slot.slot_id;
        let details = serde_json::to_value(&slot).unwrap_or(Value::Null);
        self.state.send_modify(|view| {
            view.selection.selected_slot_id = Some(slot_id);
            view.selection.slot_details = Some(slot);
            view.selection.is_slot_locked = false;
        });
        self.store.set(SELECTED_SLOT_ID, json!(slot_id));
        self.store.set(SLOT_DETAILS, details);
        self.store.set(IS_SLOT_LOCKED, json!(false));
        debug!(slot_id, "time slot saved without lock");
    }

    /// Asks the backend to hold the slot. Never touches the selection.
    pub async fn lock_time_slot(&self, slot_id: i64) -> bool {
        match self.api.lock_slot(slot_id).await {
            Ok(()) => {
                info!(slot_id, "time slot locked");
                true
            }
            Err(err) => {
                warn!(?err, slot_id, "time slot lock failed");
                let notice = match err {
                    ApiError::Unauthenticated => CheckoutError::NotAuthenticated,
                    _ => CheckoutError::SlotUnavailable,
                };
                let _ = self.fail::<()>(notice);
                false
            }
        }
    }

    pub async fn select_time_slot(&self, slot_id: i64) -> bool {
        let (selection, epoch) = self.current();
        let Some(invoice_id) = selection.selected_invoice_id else {
            let _ = self.fail::<()>(CheckoutError::NoItemSelected);
            return false;
        };

        if !self.lock_time_slot(slot_id).await {
            return false;
        }
        if self.epoch() != epoch {
            debug!(slot_id, "item changed while locking, dropping slot");
            return false;
        }

        let mut stale_details = false;
        self.state.send_modify(|view| {
            let selection = &mut view.selection;
            selection.selected_slot_id = Some(slot_id);
            selection.is_slot_locked = true;
            if selection
                .slot_details
                .as_ref()
                .is_some_and(|slot| slot.slot_id != slot_id)
            {
                selection.slot_details = None;
                stale_details = true;
            }
            view.notice = None;
        });
        self.store.set(SELECTED_SLOT_ID, json!(slot_id));
        self.store.set(IS_SLOT_LOCKED, json!(true));
        if stale_details {
            self.store.remove(SLOT_DETAILS);
        }

        self.refresh_slot_details(invoice_id, slot_id, epoch).await;
        true
    }

    async fn refresh_slot_details(&self, invoice_id: i64, slot_id: i64, epoch: u64) {
        let Some(item) = self.cart.item(invoice_id).await else {
            warn!(invoice_id, "selected item missing from cart, slot details not refreshed");
            return;
        };

        let slots = match self.api.slots(item.brand_id).await {
            Ok(slots) => slots,
            Err(err) => {
                warn!(?err, brand_id = item.brand_id, "slot details fetch failed");
                return;
            }
        };

        let Some(slot) = slots.into_iter().find(|slot| slot.slot_id == slot_id) else {
            debug!(slot_id, "locked slot not listed for brand");
            return;
        };

        if self.epoch() != epoch {
            return;
        }
        let details = serde_json::to_value(&slot).unwrap_or(Value::Null);
        let mut stored = false;
        self.state.send_modify(|view| {
            if view.selection.selected_slot_id == Some(slot_id) {
                view.selection.slot_details = Some(slot);
                stored = true;
            }
        });
        if stored {
            self.store.set(SLOT_DETAILS, details);
        }
    }

    /// Both ids land together; a half-picked target is never confirmed.
    pub fn select_address_and_car(&self, address_id: i64, car_id: i64) {
        self.state.send_modify(|view| {
            view.selection.selected_address_id = Some(address_id);
            view.selection.selected_car_id = Some(car_id);
            view.selection.selection_confirmed = true;
        });
        debug!(address_id, car_id, "delivery target confirmed");
    }

    pub fn set_discount_code(&self, code: &str) {
        let code = code.to_string();
        self.state
            .send_modify(|view| view.selection.discount_code = code);
    }

    pub async fn apply_discount(&self) -> Result<Discount, CheckoutError> {
        let (selection, epoch) = self.current();
        let invoice_id = selection.selected_invoice_id;
        let code = selection.discount_code.trim().to_string();

        let Some(invoice_id) = invoice_id else {
            return self.fail(CheckoutError::NoItemSelected);
        };
        if code.is_empty() {
            return self.fail(CheckoutError::EmptyDiscountCode);
        }
        if self.auth.token().is_none() {
            return self.fail(CheckoutError::NotAuthenticated);
        }
        let Some(item) = self.cart.item(invoice_id).await else {
            return self.fail(CheckoutError::NoItemSelected);
        };

        let discount = match self.api.validate_discount(&code, item.brand_id).await {
            Ok(discount) => discount,
            Err(ApiError::Unauthenticated) => return self.fail(CheckoutError::NotAuthenticated),
            Err(err) => {
                warn!(?err, code = %code, "discount rejected");
                return self.fail(CheckoutError::InvalidDiscount);
            }
        };

        let subtotal = pricing::subtotal(&item);
        if pricing::discount_value(subtotal, discount) > subtotal {
            return self.fail(CheckoutError::DiscountExceedsSubtotal);
        }
        if self.epoch() != epoch {
            return self.fail(CheckoutError::SelectionChanged);
        }

        self.state.send_modify(|view| {
            view.selection.discount_amount = discount.discount_amount;
            view.selection.discount_type = discount.discount_type;
            view.selection.applied_discount_code = Some(code.clone());
            view.notice = None;
        });
        info!(invoice_id, code = %code, ?discount, "discount applied");
        Ok(discount)
    }

    pub async fn pricing(&self) -> Option<Pricing> {
        let selection = self.selection();
        let item = self.cart.item(selection.selected_invoice_id?).await?;
        Some(Pricing::for_item(&item, selection.discount()))
    }

    pub async fn process_payment(
        &self,
        payment_method_id: &str,
    ) -> Result<PaymentOutcome, CheckoutError> {
        let (selection, epoch) = self.current();
        let Some(invoice_id) = selection.selected_invoice_id else {
            return self.fail(CheckoutError::NoItemSelected);
        };
        let Some(slot_id) = selection.selected_slot_id else {
            return self.fail(CheckoutError::NoSlotSelected);
        };
        let (Some(address_id), Some(car_id)) =
            (selection.selected_address_id, selection.selected_car_id)
        else {
            return self.fail(CheckoutError::AddressAndCarRequired);
        };
        if self.auth.token().is_none() {
            return self.fail(CheckoutError::NotAuthenticated);
        }

        if !selection.is_slot_locked {
            if !self.lock_time_slot(slot_id).await {
                return self.fail(CheckoutError::SlotUnavailable);
            }
            if self.epoch() != epoch {
                return self.fail(CheckoutError::SelectionChanged);
            }
            self.state
                .send_modify(|view| view.selection.is_slot_locked = true);
            self.store.set(IS_SLOT_LOCKED, json!(true));
        }

        let request = PaymentRequest {
            payment_method_id: payment_method_id.to_string(),
            invoice_id,
            slot_id,
            discount_code: selection
                .applied_discount_code
                .filter(|_| selection.discount_type.is_some()),
            user_address: address_id,
            user_car: car_id,
        };

        self.state.send_modify(|view| {
            view.processing = true;
            view.notice = None;
        });
        info!(invoice_id, slot_id, "submitting payment");
        let result = self.api.make_payment(&request).await;
        self.state.send_modify(|view| view.processing = false);

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(ApiError::Unauthenticated) => return self.fail(CheckoutError::NotAuthenticated),
            Err(err) => {
                warn!(?err, invoice_id, "payment failed");
                return self.fail(CheckoutError::PaymentFailed(err.to_string()));
            }
        };

        if self.epoch() == epoch {
            self.reset_selection();
        } else {
            debug!(invoice_id, "selection changed during payment, keeping new selection");
        }

        match receipt.redirect_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                info!(invoice_id, "payment continues at gateway");
                Ok(PaymentOutcome::Redirect(url))
            }
            None => {
                info!(invoice_id, "payment settled");
                self.cart.refresh().await;
                Ok(PaymentOutcome::ShowOrders)
            }
        }
    }

    pub fn reset_selection(&self) {
        self.state.send_modify(|view| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            view.selection = CartSelection::default();
            view.notice = None;
        });
        for key in SELECTION_KEYS {
            self.store.remove(key);
        }
    }
}

fn read_selection(store: &dyn SelectionStore) -> CartSelection {
    let Some(invoice_id) = store.get(SELECTED_INVOICE_ID).and_then(|v| v.as_i64()) else {
        return CartSelection::default();
    };

    let mut selection = CartSelection::for_item(invoice_id);
    selection.selected_slot_id = store.get(SELECTED_SLOT_ID).and_then(|v| v.as_i64());
    if let Some(slot_id) = selection.selected_slot_id {
        selection.is_slot_locked = store
            .get(IS_SLOT_LOCKED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        selection.slot_details = store
            .get(SLOT_DETAILS)
            .and_then(|v| serde_json::from_value::<TimeSlot>(v).ok())
            .filter(|slot| slot.slot_id == slot_id);
    }
    selection
}
